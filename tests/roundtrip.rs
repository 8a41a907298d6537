//! End-to-end exercises of the encoder/decoder pairs through the public
//! API, including the frame decoder pipeline and the metadata
//! projections.

use std::sync::mpsc::sync_channel;

use satcodec::ax25::{Ax25Decoder, Ax25Encoder};
use satcodec::ax100_mode5::{Ax100Mode5Decoder, Ax100Mode5Encoder};
use satcodec::ber::BerCalculator;
use satcodec::bits;
use satcodec::conv::{CodingRate, ConvDecoder, ConvEncoder};
use satcodec::crc::Crc;
use satcodec::decoder::Decoder;
use satcodec::encoder::Encoder;
use satcodec::frame_decoder::FrameDecoder;
use satcodec::metadata::{MetaKey, MetaValue};
use satcodec::sigmf::SigmfMetadata;
use satcodec::whitening::Whitening;

use rand::Rng;

#[test]
fn ax25_scrambled_nrzi_through_pipeline() -> satcodec::Result<()> {
    let enc = Ax25Encoder::new("N0CALL", 0, "N0CALL", 0, 16, 16, true, true)?;
    let frame = enc.encode(&[0xde, 0xad, 0xbe, 0xef])?;
    let stream = bits::packed_to_unpacked(&frame);

    let dec = Ax25Decoder::builder().descramble(true).build()?;
    let (tx, rx) = sync_channel(8);
    let mut pipeline = FrameDecoder::new(Box::new(dec), tx);
    for chunk in stream.chunks(97) {
        pipeline.process(chunk, None)?;
    }

    let meta = rx.try_recv().expect("decoded frame");
    assert_eq!(meta.pdu().unwrap(), &[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(
        meta.get(MetaKey::DecoderCrcValid),
        Some(&MetaValue::Bool(true))
    );
    assert_eq!(
        meta.get(MetaKey::DecoderName),
        Some(&MetaValue::Str("ax25".to_string()))
    );
    Ok(())
}

#[test]
fn ax100_mode5_length_field_recovery() -> satcodec::Result<()> {
    // A 32-byte payload with CRC32C and RS off; any single bit flip in
    // the Golay coded length field must be transparent.
    let preamble = [0xAA; 4];
    let sync = [0x93, 0x0B, 0x51, 0xDE];
    let enc = Ax100Mode5Encoder::new(&preamble, &sync, Crc::Crc32c, false)?;
    let frame = enc.encode(&[0x5A; 32])?;
    let length_field = preamble.len() + sync.len();

    let mut rng = rand::rng();
    let flip = rng.random_range(0..24);
    let mut corrupted = frame.clone();
    corrupted[length_field + flip / 8] ^= 0x80 >> (flip % 8);

    let dec = Ax100Mode5Decoder::new(&preamble, 4, &sync, 4, Crc::Crc32c, None, false)?;
    let (tx, rx) = sync_channel(8);
    let mut pipeline = FrameDecoder::new(Box::new(dec), tx);
    pipeline.process(&bits::packed_to_unpacked(&corrupted), None)?;

    let meta = rx.try_recv().expect("decoded frame");
    assert_eq!(meta.pdu().unwrap(), &[0x5A; 32]);
    assert_eq!(
        meta.get(MetaKey::DecoderCrcValid),
        Some(&MetaValue::Bool(true))
    );
    Ok(())
}

#[test]
fn conv_rate_3_4_roundtrip() {
    let mut rng = rand::rng();
    let payload: Vec<u8> = (0..128).map(|_| rng.random()).collect();
    let data = bits::packed_to_unpacked(&payload);

    let mut enc = ConvEncoder::new(CodingRate::Rate3_4);
    let coded = enc.encode(&data);
    let soft: Vec<i8> = coded.iter().map(|b| bits::hard_to_soft(*b)).collect();

    let mut dec = ConvDecoder::new(CodingRate::Rate3_4);
    let decoded = dec.decode(&soft);
    assert_eq!(decoded, data);
}

#[test]
fn ber_harness_loopback() -> satcodec::Result<()> {
    // Spec sanity scenario: 100 triggers through a perfect channel.
    let mut ber = BerCalculator::new(256, 100, 0)?;
    while let Some(frame) = ber.trigger() {
        ber.received(&frame);
    }
    let report = ber.report();
    assert_eq!(report.sent, 100);
    assert_eq!(report.received, 100);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.fer, 0.0);
    assert_eq!(report.ber, 0.0);
    Ok(())
}

#[test]
fn ber_harness_through_real_codec() -> satcodec::Result<()> {
    // The harness framing must survive an actual encoder/decoder pair,
    // not just a wire loop.
    let preamble = [0xAA; 4];
    let sync = [0x93, 0x0B, 0x51, 0xDE];
    let enc = Ax100Mode5Encoder::new(&preamble, &sync, Crc::Crc32c, false)?;
    let mut dec = Ax100Mode5Decoder::new(&preamble, 4, &sync, 4, Crc::Crc32c, None, false)?;

    let mut ber = BerCalculator::new(64, 20, 0)?;
    while let Some(frame) = ber.trigger() {
        let tx = enc.encode(&frame)?;
        let stream = bits::packed_to_unpacked(&tx);
        let mut offset = 0;
        while offset < stream.len() {
            let status = dec.decode(&stream[offset..]);
            offset += status.consumed;
            if status.decode_success {
                ber.received(status.metadata.pdu().unwrap());
            }
            if status.consumed == 0 {
                break;
            }
        }
    }
    let report = ber.report();
    assert_eq!(report.sent, 20);
    assert_eq!(report.received, 20);
    assert_eq!(report.fer, 0.0);
    Ok(())
}

#[test]
fn decoded_frames_project_to_sigmf_and_json() -> satcodec::Result<()> {
    let enc = Ax25Encoder::new("N0CALL", 0, "N0CALL", 0, 16, 16, true, true)?;
    let frame = enc.encode(b"hello there")?;
    let stream = bits::packed_to_unpacked(&frame);

    let dec = Ax25Decoder::builder().descramble(true).build()?;
    let (tx, rx) = sync_channel(8);
    let mut pipeline = FrameDecoder::new(Box::new(dec), tx);
    pipeline.process(&stream, None)?;
    let meta = rx.try_recv().expect("decoded frame");

    // Flat JSON projection.
    let j = meta.to_json(Some(&serde_json::json!({"observation": 4242})));
    assert_eq!(j["decoder_name"], "ax25");
    assert_eq!(j["extra"]["observation"], 4242);
    let pdu_b64 = j["pdu"].as_str().unwrap();
    assert!(!pdu_b64.is_empty());

    // sigMF projection: the frame has sample_cnt, so it becomes an
    // annotation.
    let mut sigmf = SigmfMetadata::new(r#"{"core:datatype": "cf32_le"}"#)?;
    sigmf.transform(&meta);
    let doc = sigmf.to_json();
    assert_eq!(doc["annotations"].as_array().unwrap().len(), 1);
    assert_eq!(doc["annotations"][0]["satnogs:pdu"], *pdu_b64);
    assert_eq!(doc["captures"].as_array().unwrap().len(), 0);
    Ok(())
}

#[test]
fn scrambler_orientations_mirror() {
    // Additive and self-synchronizing whitening in both bit orders, as a
    // guard against MSB/LSB regressions at the module boundaries.
    let mut rng = rand::rng();
    let data: Vec<u8> = (0..128).map(|_| rng.random()).collect();
    for msb in [false, true] {
        for (mk_tx, mk_rx) in [
            (Whitening::ccsds(msb), Whitening::ccsds(msb)),
            (Whitening::g3ruh(msb), Whitening::g3ruh(msb)),
        ] {
            let mut tx = mk_tx;
            let mut rx = mk_rx;
            let mut buf = data.clone();
            tx.scramble(&mut buf);
            rx.descramble(&mut buf);
            assert_eq!(buf, data, "msb_first={msb}");
        }
    }
}
