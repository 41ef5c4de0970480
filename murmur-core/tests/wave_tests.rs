//! Integration tests for wave container parsing and sample decoding

use std::io::Cursor;

use murmur_core::wave::{WaveReader, SAMPLE_RATE};
use murmur_core::MurmurError;
use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio_util::sync::CancellationToken;

/// Build a canonical PCM container: RIFF header, 16-byte format chunk, data.
fn pcm_wave(channels: u16, sample_rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
    let block_align = channels * (bits / 8);
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Same container with a 40-byte extensible format chunk and the given
/// sub-format GUID.
fn extensible_wave(guid: [u8; 16], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(60 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&0xFFFEu16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&16_000u32.to_le_bytes());
    out.extend_from_slice(&32_000u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(&22u16.to_le_bytes()); // extension size
    out.extend_from_slice(&16u16.to_le_bytes()); // valid bits
    out.extend_from_slice(&0u32.to_le_bytes()); // channel mask
    out.extend_from_slice(&guid);
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

const PCM_GUID: [u8; 16] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
];

fn samples_16(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn parses_a_canonical_container() {
    let bytes = pcm_wave(1, 16_000, 16, &samples_16(&[0, 1, 2, 3]));
    let mut reader = WaveReader::new(Cursor::new(bytes));
    reader.initialize().unwrap();

    assert_eq!(reader.channels(), 1);
    assert_eq!(reader.sample_rate(), SAMPLE_RATE);
    assert_eq!(reader.bits_per_sample(), 16);
    assert_eq!(reader.frame_count(), 4);
    assert_eq!(reader.duration().as_micros(), 250);
}

#[test]
fn accessors_are_zero_before_initialization() {
    let reader = WaveReader::new(Cursor::new(Vec::<u8>::new()));
    assert!(!reader.is_initialized());
    assert_eq!(reader.frame_count(), 0);
    assert_eq!(reader.duration().as_nanos(), 0);
}

#[rstest]
#[case(&b"RIFX"[..], &b"WAVE"[..])]
#[case(&b"RIFF"[..], &b"AVI "[..])]
fn rejects_bad_magic_as_corrupt(#[case] riff: &[u8], #[case] wave: &[u8]) {
    let mut bytes = pcm_wave(1, 16_000, 16, &[]);
    bytes[0..4].copy_from_slice(riff);
    bytes[8..12].copy_from_slice(wave);

    let err = WaveReader::new(Cursor::new(bytes)).initialize().unwrap_err();
    assert!(matches!(err, MurmurError::CorruptWave(_)), "got {err:?}");
}

#[test]
fn rejects_wrong_sample_rate_as_unsupported() {
    let bytes = pcm_wave(1, 44_100, 16, &[]);
    let err = WaveReader::new(Cursor::new(bytes)).initialize().unwrap_err();
    assert!(matches!(err, MurmurError::UnsupportedWave(_)), "got {err:?}");
}

#[test]
fn rejects_truncated_header_as_corrupt() {
    let bytes = pcm_wave(1, 16_000, 16, &samples_16(&[0; 8]));
    let err = WaveReader::new(Cursor::new(bytes[..20].to_vec()))
        .initialize()
        .unwrap_err();
    assert!(matches!(err, MurmurError::CorruptWave(_)), "got {err:?}");
}

#[test]
fn accepts_extensible_pcm() {
    let bytes = extensible_wave(PCM_GUID, &samples_16(&[5, -5]));
    let mut reader = WaveReader::new(Cursor::new(bytes));
    reader.initialize().unwrap();
    assert_eq!(reader.frame_count(), 2);
}

#[test]
fn rejects_extensible_non_pcm_as_unsupported() {
    // IEEE float sub-format: same GUID with a different leading code.
    let mut guid = PCM_GUID;
    guid[0] = 0x03;
    let bytes = extensible_wave(guid, &[]);
    let err = WaveReader::new(Cursor::new(bytes)).initialize().unwrap_err();
    assert!(matches!(err, MurmurError::UnsupportedWave(_)), "got {err:?}");
}

#[test]
fn skips_unknown_chunks_on_both_sides_of_fmt() {
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&100u32.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    // JUNK before fmt.
    out.extend_from_slice(b"JUNK");
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&16_000u32.to_le_bytes());
    out.extend_from_slice(&32_000u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    // LIST between fmt and data.
    out.extend_from_slice(b"LIST");
    out.extend_from_slice(&6u32.to_le_bytes());
    out.extend_from_slice(&[0u8; 6]);
    out.extend_from_slice(b"data");
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&samples_16(&[7, -7]));

    let mut reader = WaveReader::new(Cursor::new(out));
    reader.initialize().unwrap();
    assert_eq!(reader.frame_count(), 2);
}

#[test]
fn chunk_sizes_above_i32_max_are_corrupt() {
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&100u32.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"JUNK");
    out.extend_from_slice(&0x8000_0000u32.to_le_bytes());

    let err = WaveReader::new(Cursor::new(out)).initialize().unwrap_err();
    assert!(matches!(err, MurmurError::CorruptWave(_)), "got {err:?}");
}

#[test]
fn all_ones_data_size_is_measured_from_the_stream() {
    let mut bytes = pcm_wave(1, 16_000, 16, &samples_16(&[1, 2, 3, 4, 5, 6, 7, 8]));
    let data_size_at = bytes.len() - 16 - 4;
    bytes[data_size_at..data_size_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());

    let mut reader = WaveReader::new(Cursor::new(bytes));
    reader.initialize().unwrap();
    assert_eq!(reader.data_len(), 16);
    assert_eq!(reader.frame_count(), 8);

    let samples = reader.mono_samples().unwrap();
    assert_eq!(samples.len(), 8);
}

#[test]
fn decodes_8_bit_offset_binary() {
    let bytes = pcm_wave(1, 16_000, 8, &[128, 0, 255]);
    let mut reader = WaveReader::new(Cursor::new(bytes));
    let samples = reader.mono_samples().unwrap();
    assert_eq!(samples, vec![0.0, -1.0, 127.0 / 128.0]);
}

#[test]
fn decodes_16_bit_full_scale() {
    let bytes = pcm_wave(1, 16_000, 16, &samples_16(&[i16::MIN, 0, 16_384]));
    let mut reader = WaveReader::new(Cursor::new(bytes));
    let samples = reader.mono_samples().unwrap();
    assert_eq!(samples, vec![-1.0, 0.0, 0.5]);
}

#[test]
fn decodes_24_bit_with_sign_extension() {
    // -8388608 and +4194304 as little-endian 24-bit.
    let data = [0x00, 0x00, 0x80, 0x00, 0x00, 0x40];
    let bytes = pcm_wave(1, 16_000, 24, &data);
    let mut reader = WaveReader::new(Cursor::new(bytes));
    let samples = reader.mono_samples().unwrap();
    assert_eq!(samples, vec![-1.0, 0.5]);
}

#[test]
fn decodes_32_bit_full_scale() {
    let data: Vec<u8> = [i32::MIN, 1 << 30]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    let bytes = pcm_wave(1, 16_000, 32, &data);
    let mut reader = WaveReader::new(Cursor::new(bytes));
    let samples = reader.mono_samples().unwrap();
    assert_eq!(samples, vec![-1.0, 0.5]);
}

#[test]
fn downmix_averages_the_channels() {
    // Stereo frames (L, R): (16384, -16384) and (16384, 16384).
    let bytes = pcm_wave(2, 16_000, 16, &samples_16(&[16_384, -16_384, 16_384, 16_384]));
    let mut reader = WaveReader::new(Cursor::new(bytes));
    let samples = reader.mono_samples().unwrap();
    assert_eq!(samples, vec![0.0, 0.5]);
}

#[test]
fn channels_extract_independently_and_repeatedly() {
    let bytes = pcm_wave(2, 16_000, 16, &samples_16(&[100, -100, 200, -200]));
    let mut reader = WaveReader::new(Cursor::new(bytes));

    let left = reader.channel_samples(0).unwrap();
    let right = reader.channel_samples(1).unwrap();
    assert_eq!(left, vec![100.0 / 32768.0, 200.0 / 32768.0]);
    assert_eq!(right, vec![-100.0 / 32768.0, -200.0 / 32768.0]);

    // The reader rewinds per extraction.
    assert_eq!(reader.channel_samples(0).unwrap(), left);
}

#[test]
fn out_of_range_channel_is_an_invalid_argument() {
    let bytes = pcm_wave(2, 16_000, 16, &samples_16(&[0, 0]));
    let mut reader = WaveReader::new(Cursor::new(bytes));
    let err = reader.channel_samples(2).unwrap_err();
    assert!(matches!(err, MurmurError::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn short_data_payload_is_corrupt() {
    // Declares 8 frames but carries 2.
    let mut bytes = pcm_wave(1, 16_000, 16, &samples_16(&[1, 2]));
    let data_size_at = bytes.len() - 4 - 4;
    bytes[data_size_at..data_size_at + 4].copy_from_slice(&16u32.to_le_bytes());

    let mut reader = WaveReader::new(Cursor::new(bytes));
    let err = reader.mono_samples().unwrap_err();
    assert!(matches!(err, MurmurError::CorruptWave(_)), "got {err:?}");
}

#[test]
fn partial_trailing_frame_is_dropped() {
    // 5 bytes of 16-bit mono: two whole frames plus a dangling byte.
    let bytes = pcm_wave(1, 16_000, 16, &[1, 0, 2, 0, 3]);
    let mut reader = WaveReader::new(Cursor::new(bytes));
    reader.initialize().unwrap();
    assert_eq!(reader.frame_count(), 2);
    assert_eq!(reader.mono_samples().unwrap().len(), 2);
}

#[tokio::test]
async fn async_reads_match_blocking_reads() {
    let bytes = pcm_wave(2, 16_000, 16, &samples_16(&[10, 20, -30, 40, 50, -60]));

    let mut blocking = WaveReader::new(Cursor::new(bytes.clone()));
    let expected = blocking.mono_samples().unwrap();
    let expected_left = blocking.channel_samples(0).unwrap();

    let cancel = CancellationToken::new();
    let mut reader = WaveReader::new(Cursor::new(bytes));
    reader.initialize_async(&cancel).await.unwrap();
    assert_eq!(reader.mono_samples_async(&cancel).await.unwrap(), expected);
    assert_eq!(
        reader.channel_samples_async(0, &cancel).await.unwrap(),
        expected_left
    );
}

#[tokio::test]
async fn cancelled_token_stops_async_parsing() {
    let bytes = pcm_wave(1, 16_000, 16, &samples_16(&[0; 64]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut reader = WaveReader::new(Cursor::new(bytes));
    let err = reader.mono_samples_async(&cancel).await.unwrap_err();
    assert!(err.is_cancelled(), "got {err:?}");
}

#[test]
fn reads_files_written_by_hound() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..1600i16 {
        writer.write_sample(i).unwrap();
    }
    writer.finalize().unwrap();

    let mut reader = WaveReader::new(std::io::BufReader::new(
        std::fs::File::open(&path).unwrap(),
    ));
    reader.initialize().unwrap();
    assert_eq!(reader.frame_count(), 1600);
    let samples = reader.mono_samples().unwrap();
    assert_eq!(samples.len(), 1600);
    assert_eq!(samples[1], 1.0 / 32768.0);
}
