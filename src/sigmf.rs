/*! sigMF-flavored metadata projection.

Maps the flat per-frame [`Metadata`] dictionaries onto [sigMF][sigmf]
segments across the `core`, `antenna` and a custom `satnogs` namespace.

Segment rules: a dictionary carrying `center_freq` describes a capture
segment; one carrying `sample_cnt` describes an annotation segment, to
which all the per-frame keys attach. The `global` segment is supplied by
the caller as a JSON blob at construction and is emitted verbatim, apart
from the decoder phase/resampling keys which are folded into it.

[sigmf]: https://github.com/sigmf/SigMF
 */
use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::Result;
use crate::metadata::{MetaKey, MetaValue, Metadata};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Capture segment.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Capture {
    /// Sample index in the dataset at which this segment takes effect.
    #[serde(rename = "core:sample_start")]
    sample_start: u64,

    /// Index relative to the original sample stream.
    #[serde(rename = "core:global_index", skip_serializing_if = "Option::is_none")]
    global_index: Option<u64>,

    /// Center frequency of the capture.
    #[serde(rename = "core:frequency", skip_serializing_if = "Option::is_none")]
    frequency: Option<f64>,

    /// ISO8601 timestamp of the first sample.
    #[serde(rename = "core:datetime", skip_serializing_if = "Option::is_none")]
    datetime: Option<String>,
}

/// Annotation segment.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Annotation {
    /// Sample offset of the annotated range.
    #[serde(rename = "core:sample_start", skip_serializing_if = "Option::is_none")]
    sample_start: Option<u64>,

    /// Width of the annotated range.
    #[serde(rename = "core:sample_count", skip_serializing_if = "Option::is_none")]
    sample_count: Option<u64>,

    /// The decoded frame, base64.
    #[serde(rename = "satnogs:pdu", skip_serializing_if = "Option::is_none")]
    pdu: Option<String>,

    /// Decode timestamp.
    #[serde(rename = "satnogs:time", skip_serializing_if = "Option::is_none")]
    time: Option<String>,

    /// CRC verdict of the decoder.
    #[serde(
        rename = "satnogs:decoder_crc_valid",
        skip_serializing_if = "Option::is_none"
    )]
    decoder_crc_valid: Option<bool>,

    /// Symbols the FEC saw as erased.
    #[serde(
        rename = "satnogs:decoder_symbol_erasures",
        skip_serializing_if = "Option::is_none"
    )]
    decoder_symbol_erasures: Option<u64>,

    /// Bits or symbols the FEC corrected.
    #[serde(
        rename = "satnogs:decoder_corrected_bits",
        skip_serializing_if = "Option::is_none"
    )]
    decoder_corrected_bits: Option<u64>,

    /// Carrier offset.
    #[serde(
        rename = "satnogs:frequency_offset",
        skip_serializing_if = "Option::is_none"
    )]
    frequency_offset: Option<f64>,

    /// Estimated SNR.
    #[serde(rename = "satnogs:snr", skip_serializing_if = "Option::is_none")]
    snr: Option<f32>,

    /// Mean symbol timing error.
    #[serde(
        rename = "satnogs:symbol_timing_error",
        skip_serializing_if = "Option::is_none"
    )]
    symbol_timing_error: Option<f64>,

    /// Emitting decoder.
    #[serde(rename = "satnogs:decoder_name", skip_serializing_if = "Option::is_none")]
    decoder_name: Option<String>,

    /// Emitting decoder version.
    #[serde(
        rename = "satnogs:decoder_version",
        skip_serializing_if = "Option::is_none"
    )]
    decoder_version: Option<String>,

    /// Antenna azimuth.
    #[serde(
        rename = "antenna:azimuth_angle",
        skip_serializing_if = "Option::is_none"
    )]
    azimuth_angle: Option<f64>,

    /// Antenna elevation.
    #[serde(
        rename = "antenna:elevation_angle",
        skip_serializing_if = "Option::is_none"
    )]
    elevation_angle: Option<f64>,

    /// Antenna polarization.
    #[serde(rename = "antenna:polarization", skip_serializing_if = "Option::is_none")]
    polarization: Option<String>,
}

fn get_u64(m: &Metadata, k: MetaKey) -> Option<u64> {
    match m.get(k) {
        Some(MetaValue::U64(v)) => Some(*v),
        _ => None,
    }
}

fn get_f64(m: &Metadata, k: MetaKey) -> Option<f64> {
    match m.get(k) {
        Some(MetaValue::F64(v)) => Some(*v),
        _ => None,
    }
}

fn get_f32(m: &Metadata, k: MetaKey) -> Option<f32> {
    match m.get(k) {
        Some(MetaValue::F32(v)) => Some(*v),
        _ => None,
    }
}

fn get_bool(m: &Metadata, k: MetaKey) -> Option<bool> {
    match m.get(k) {
        Some(MetaValue::Bool(v)) => Some(*v),
        _ => None,
    }
}

fn get_str(m: &Metadata, k: MetaKey) -> Option<String> {
    match m.get(k) {
        Some(MetaValue::Str(v)) => Some(v.clone()),
        _ => None,
    }
}

/// Accumulating sigMF document.
pub struct SigmfMetadata {
    global: serde_json::Value,
    captures: Vec<Capture>,
    annotations: Vec<Annotation>,
}

impl SigmfMetadata {
    /// Create a sink; `global_segment_json` is emitted verbatim as the
    /// `global` object.
    pub fn new(global_segment_json: &str) -> Result<Self> {
        Ok(Self {
            global: serde_json::from_str(global_segment_json)?,
            captures: Vec::new(),
            annotations: Vec::new(),
        })
    }

    /// Fold one frame dictionary into the document.
    pub fn transform(&mut self, m: &Metadata) {
        if let Some(obj) = self.global.as_object_mut() {
            if let Some(phase) = get_u64(m, MetaKey::DecoderPhase) {
                obj.insert("satnogs:decoder_phase".to_string(), json!(phase));
            }
            if let Some(ratio) = get_f32(m, MetaKey::DecoderResamplingRatio) {
                obj.insert("satnogs:decoder_resampling_ratio".to_string(), json!(ratio));
            }
        }

        // The keys shared between segment kinds make a dictionary
        // ambiguous on its own; `center_freq` only ever describes a
        // capture, so its presence decides.
        if let Some(freq) = get_f64(m, MetaKey::CenterFreq) {
            self.captures.push(Capture {
                sample_start: get_u64(m, MetaKey::SampleStart).unwrap_or(0),
                global_index: None,
                frequency: Some(freq),
                datetime: get_str(m, MetaKey::Time),
            });
        }

        // Same trick for annotations, with `sample_cnt`.
        if let Some(cnt) = get_u64(m, MetaKey::SampleCnt) {
            self.annotations.push(Annotation {
                sample_start: get_u64(m, MetaKey::SampleStart),
                sample_count: Some(cnt),
                pdu: m.pdu().map(|b| BASE64.encode(b)),
                time: get_str(m, MetaKey::Time),
                decoder_crc_valid: get_bool(m, MetaKey::DecoderCrcValid),
                decoder_symbol_erasures: get_u64(m, MetaKey::DecoderSymbolErasures),
                decoder_corrected_bits: get_u64(m, MetaKey::DecoderCorrectedBits),
                frequency_offset: get_f64(m, MetaKey::FreqOffset),
                snr: get_f32(m, MetaKey::Snr),
                symbol_timing_error: get_f64(m, MetaKey::SymbolTimingError),
                decoder_name: get_str(m, MetaKey::DecoderName),
                decoder_version: get_str(m, MetaKey::DecoderVersion),
                azimuth_angle: get_f64(m, MetaKey::AntennaAzimuth),
                elevation_angle: get_f64(m, MetaKey::AntennaElevation),
                polarization: get_str(m, MetaKey::AntennaPolarization),
            });
        }
    }

    /// The whole document as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "global": self.global,
            "captures": self.captures,
            "annotations": self.annotations,
        })
    }

    /// Serialize the document.
    pub fn to_string_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json())?)
    }

    /// Write the document to a file.
    pub fn to_file(&self, path: &std::path::Path) -> Result<()> {
        let mut f = std::fs::File::create(path)?;
        f.write_all(self.to_string_pretty()?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_meta() -> Metadata {
        let mut m = Metadata::new();
        m.set_pdu(&[0xde, 0xad]);
        m.set_crc_valid(true);
        m.set_sample_start(4000);
        m.set_sample_cnt(1600);
        m.set_decoder("ax25", "1.2");
        m.set_snr(9.5);
        m
    }

    #[test]
    fn annotation_from_frame() {
        let mut s = SigmfMetadata::new(r#"{"core:datatype": "cf32_le"}"#).unwrap();
        s.transform(&frame_meta());
        let j = s.to_json();
        assert_eq!(j["global"]["core:datatype"], "cf32_le");
        assert_eq!(j["captures"].as_array().unwrap().len(), 0);
        let ann = &j["annotations"][0];
        assert_eq!(ann["core:sample_start"], 4000);
        assert_eq!(ann["core:sample_count"], 1600);
        assert_eq!(ann["satnogs:pdu"], "3q0=");
        assert_eq!(ann["satnogs:decoder_crc_valid"], true);
        assert_eq!(ann["satnogs:decoder_name"], "ax25");
        assert_eq!(ann["satnogs:snr"], 9.5);
        assert!(ann.get("antenna:polarization").is_none());
    }

    #[test]
    fn capture_from_center_freq() {
        let mut s = SigmfMetadata::new("{}").unwrap();
        let mut m = Metadata::new();
        m.set_center_freq(435_500_000.0);
        m.set_sample_start(0);
        m.set_time_now();
        s.transform(&m);
        let j = s.to_json();
        assert_eq!(j["captures"].as_array().unwrap().len(), 1);
        assert_eq!(j["captures"][0]["core:frequency"], 435_500_000.0);
        assert_eq!(j["annotations"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn global_gets_decoder_state() {
        let mut s = SigmfMetadata::new("{}").unwrap();
        let mut m = Metadata::new();
        m.set_phase_delay(12);
        m.set_resampling_ratio(0.5);
        m.set_sample_cnt(10);
        s.transform(&m);
        let j = s.to_json();
        assert_eq!(j["global"]["satnogs:decoder_phase"], 12);
        assert_eq!(j["global"]["satnogs:decoder_resampling_ratio"], 0.5);
    }

    #[test]
    fn rejects_bad_global_json() {
        assert!(SigmfMetadata::new("not json").is_err());
    }

    #[test]
    fn document_roundtrips_through_serde() {
        let mut s = SigmfMetadata::new(r#"{"core:version": "1.0.0"}"#).unwrap();
        s.transform(&frame_meta());
        let text = s.to_string_pretty().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["annotations"][0]["satnogs:decoder_version"], "1.2");
    }
}
