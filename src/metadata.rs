/*! Decoded-frame metadata.

Every decoded frame travels as a flat dictionary keyed by a closed set of
keys with fixed wire names. Downstream consumers either read the dictionary
directly or project it to JSON (here) or sigMF (see [`crate::sigmf`]).
*/

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;

/// The closed set of metadata keys. Wire names are fixed; see
/// [`MetaKey::wire_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum MetaKey {
    Pdu,
    DecoderCrcValid,
    CenterFreq,
    DecoderPhase,
    DecoderResamplingRatio,
    CrcValid,
    FreqOffset,
    DecoderCorrectedBits,
    Time,
    SampleStart,
    SampleCnt,
    DecoderSymbolErasures,
    Snr,
    DecoderName,
    DecoderVersion,
    AntennaAzimuth,
    AntennaElevation,
    AntennaPolarization,
    SymbolTimingError,
}

impl MetaKey {
    /// All keys, in wire-definition order.
    pub const ALL: [MetaKey; 19] = [
        MetaKey::Pdu,
        MetaKey::DecoderCrcValid,
        MetaKey::CenterFreq,
        MetaKey::DecoderPhase,
        MetaKey::DecoderResamplingRatio,
        MetaKey::CrcValid,
        MetaKey::FreqOffset,
        MetaKey::DecoderCorrectedBits,
        MetaKey::Time,
        MetaKey::SampleStart,
        MetaKey::SampleCnt,
        MetaKey::DecoderSymbolErasures,
        MetaKey::Snr,
        MetaKey::DecoderName,
        MetaKey::DecoderVersion,
        MetaKey::AntennaAzimuth,
        MetaKey::AntennaElevation,
        MetaKey::AntennaPolarization,
        MetaKey::SymbolTimingError,
    ];

    /// The fixed wire name of this key.
    pub fn wire_name(&self) -> &'static str {
        match self {
            MetaKey::Pdu => "pdu",
            MetaKey::DecoderCrcValid => "decoder_crc_valid",
            MetaKey::CenterFreq => "center_freq",
            MetaKey::DecoderPhase => "decoder_phase",
            MetaKey::DecoderResamplingRatio => "decoder_resampling_ratio",
            MetaKey::CrcValid => "crc_valid",
            MetaKey::FreqOffset => "freq_offset",
            MetaKey::DecoderCorrectedBits => "decoder_corrected_bits",
            MetaKey::Time => "time",
            MetaKey::SampleStart => "sample_start",
            MetaKey::SampleCnt => "sample_cnt",
            MetaKey::DecoderSymbolErasures => "decoder_symbol_erasures",
            MetaKey::Snr => "snr",
            MetaKey::DecoderName => "decoder_name",
            MetaKey::DecoderVersion => "decoder_version",
            MetaKey::AntennaAzimuth => "antenna_azimuth",
            MetaKey::AntennaElevation => "antenna_elevation",
            MetaKey::AntennaPolarization => "antenna_polarization",
            MetaKey::SymbolTimingError => "symbol_timing_error",
        }
    }
}

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum MetaValue {
    Bool(bool),
    U64(u64),
    F64(f64),
    F32(f32),
    Bytes(Vec<u8>),
    Str(String),
}

/// Flat key → value dictionary attached to every decoded frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: BTreeMap<MetaKey, MetaValue>,
}

/// Current UTC time as ISO-8601 with microsecond precision and a `Z`
/// suffix.
pub fn time_iso8601() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

impl Metadata {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw insert.
    pub fn set(&mut self, key: MetaKey, value: MetaValue) {
        self.entries.insert(key, value);
    }

    /// Raw lookup.
    pub fn get(&self, key: MetaKey) -> Option<&MetaValue> {
        self.entries.get(&key)
    }

    /// True if no key is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over present entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&MetaKey, &MetaValue)> {
        self.entries.iter()
    }

    /// The frame payload, if present.
    pub fn pdu(&self) -> Option<&[u8]> {
        match self.entries.get(&MetaKey::Pdu) {
            Some(MetaValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// Attach the frame payload.
    pub fn set_pdu(&mut self, pdu: &[u8]) {
        self.set(MetaKey::Pdu, MetaValue::Bytes(pdu.to_vec()));
    }

    /// Stamp the current UTC time.
    pub fn set_time_now(&mut self) {
        self.set(MetaKey::Time, MetaValue::Str(time_iso8601()));
    }

    /// Record the decoder-side CRC verdict.
    pub fn set_crc_valid(&mut self, valid: bool) {
        self.set(MetaKey::DecoderCrcValid, MetaValue::Bool(valid));
    }

    /// First input item of the frame.
    pub fn set_sample_start(&mut self, idx: u64) {
        self.set(MetaKey::SampleStart, MetaValue::U64(idx));
    }

    /// Number of input items the frame spans.
    pub fn set_sample_cnt(&mut self, cnt: u64) {
        self.set(MetaKey::SampleCnt, MetaValue::U64(cnt));
    }

    /// Symbols the FEC flagged as erased.
    pub fn set_symbol_erasures(&mut self, cnt: u32) {
        self.set(MetaKey::DecoderSymbolErasures, MetaValue::U64(cnt as u64));
    }

    /// Bits or symbols the FEC corrected.
    pub fn set_corrected_bits(&mut self, cnt: u32) {
        self.set(MetaKey::DecoderCorrectedBits, MetaValue::U64(cnt as u64));
    }

    /// Observation center frequency in Hz.
    pub fn set_center_freq(&mut self, freq: f64) {
        self.set(MetaKey::CenterFreq, MetaValue::F64(freq));
    }

    /// Carrier offset in Hz.
    pub fn set_freq_offset(&mut self, offset: f64) {
        self.set(MetaKey::FreqOffset, MetaValue::F64(offset));
    }

    /// Estimated SNR in dB.
    pub fn set_snr(&mut self, snr: f32) {
        self.set(MetaKey::Snr, MetaValue::F32(snr));
    }

    /// Name and version of the emitting decoder.
    pub fn set_decoder(&mut self, name: &str, version: &str) {
        self.set(MetaKey::DecoderName, MetaValue::Str(name.to_string()));
        self.set(MetaKey::DecoderVersion, MetaValue::Str(version.to_string()));
    }

    /// Antenna azimuth in degrees.
    pub fn set_antenna_azimuth(&mut self, azimuth: f64) {
        self.set(MetaKey::AntennaAzimuth, MetaValue::F64(azimuth));
    }

    /// Antenna elevation in degrees.
    pub fn set_antenna_elevation(&mut self, elevation: f64) {
        self.set(MetaKey::AntennaElevation, MetaValue::F64(elevation));
    }

    /// Antenna polarization description.
    pub fn set_antenna_polarization(&mut self, polarization: &str) {
        self.set(
            MetaKey::AntennaPolarization,
            MetaValue::Str(polarization.to_string()),
        );
    }

    /// Decoder phase delay in samples.
    pub fn set_phase_delay(&mut self, phase: u64) {
        self.set(MetaKey::DecoderPhase, MetaValue::U64(phase));
    }

    /// Decoder resampling ratio.
    pub fn set_resampling_ratio(&mut self, ratio: f32) {
        self.set(MetaKey::DecoderResamplingRatio, MetaValue::F32(ratio));
    }

    /// Mean timing error reported by the symbol synchronizer.
    pub fn set_symbol_timing_error(&mut self, error: f64) {
        self.set(MetaKey::SymbolTimingError, MetaValue::F64(error));
    }

    /// Flat JSON projection. Every present key is emitted under its wire
    /// name; `pdu` is base64 encoded. `extra` is caller-supplied side data
    /// attached under the `extra` key.
    pub fn to_json(&self, extra: Option<&serde_json::Value>) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for (key, value) in &self.entries {
            let v = match value {
                MetaValue::Bool(b) => json!(b),
                MetaValue::U64(u) => json!(u),
                MetaValue::F64(f) => json!(f),
                MetaValue::F32(f) => json!(f),
                MetaValue::Bytes(b) => json!(BASE64.encode(b)),
                MetaValue::Str(s) => json!(s),
            };
            obj.insert(key.wire_name().to_string(), v);
        }
        if let Some(extra) = extra {
            obj.insert("extra".to_string(), extra.clone());
        }
        serde_json::Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_stable() {
        let want = [
            "pdu",
            "decoder_crc_valid",
            "center_freq",
            "decoder_phase",
            "decoder_resampling_ratio",
            "crc_valid",
            "freq_offset",
            "decoder_corrected_bits",
            "time",
            "sample_start",
            "sample_cnt",
            "decoder_symbol_erasures",
            "snr",
            "decoder_name",
            "decoder_version",
            "antenna_azimuth",
            "antenna_elevation",
            "antenna_polarization",
            "symbol_timing_error",
        ];
        for (key, name) in MetaKey::ALL.iter().zip(want) {
            assert_eq!(key.wire_name(), name);
        }
    }

    #[test]
    fn json_projection() {
        let mut m = Metadata::new();
        m.set_pdu(&[0xde, 0xad, 0xbe, 0xef]);
        m.set_crc_valid(true);
        m.set_sample_start(1000);
        m.set_sample_cnt(1234);
        m.set_decoder("ax25", "1.2");
        let j = m.to_json(None);
        assert_eq!(j["pdu"], "3q2+7w==");
        assert_eq!(j["decoder_crc_valid"], true);
        assert_eq!(j["sample_start"], 1000);
        assert_eq!(j["sample_cnt"], 1234);
        assert_eq!(j["decoder_name"], "ax25");
        assert_eq!(j["decoder_version"], "1.2");
        assert!(j.get("snr").is_none());
    }

    #[test]
    fn json_extra_blob() {
        let mut m = Metadata::new();
        m.set_snr(12.5);
        let extra = json!({"observation": 42});
        let j = m.to_json(Some(&extra));
        assert_eq!(j["extra"]["observation"], 42);
        assert_eq!(j["snr"], 12.5);
    }

    #[test]
    fn time_format() {
        let t = time_iso8601();
        // 2024-01-01T00:00:00.000000Z
        assert_eq!(t.len(), 27);
        assert!(t.ends_with('Z'));
        assert_eq!(&t[4..5], "-");
        assert_eq!(&t[10..11], "T");
        assert_eq!(&t[19..20], ".");
    }
}
