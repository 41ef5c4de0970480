//! RIFF/WAVE container reading and PCM sample decoding
//!
//! [`WaveReader`] parses just enough of a RIFF/WAVE container to hand 16 kHz
//! PCM audio to an inference pass: it scans for the `fmt ` and `data` chunks,
//! validates the encoding, and decodes integer frames into normalized `f32`
//! samples, either per channel or averaged down to mono. Both blocking and
//! async forms are provided over the same reader state.

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{MurmurError, Result};

/// Sample rate the inference engine expects, in Hz.
pub const SAMPLE_RATE: u32 = 16_000;

/// Frames decoded per buffered read. Reads are always a whole multiple of the
/// frame size, so a frame never splits across two reads.
const FRAMES_PER_READ: u64 = 2048;

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Sub-format GUID identifying PCM data inside a WAVE_FORMAT_EXTENSIBLE
/// format chunk.
const PCM_SUBFORMAT_GUID: [u8; 16] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
];

/// Incremental RIFF/WAVE parser and PCM decoder.
///
/// Construction is free; [`initialize`](WaveReader::initialize) (or its async
/// form) performs the header scan and is idempotent. Header accessors return
/// meaningful values only after initialization. Sample extraction rewinds to
/// the data chunk, so one reader can serve several extractions.
pub struct WaveReader<R> {
    stream: R,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    data_len: u64,
    data_offset: u64,
    initialized: bool,
}

impl<R> WaveReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            channels: 0,
            sample_rate: 0,
            bits_per_sample: 0,
            data_len: 0,
            data_offset: 0,
            initialized: false,
        }
    }

    /// Number of interleaved channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate in Hz. Always [`SAMPLE_RATE`] once initialized.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Bit depth of one sample: 8, 16, 24 or 32.
    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    /// Payload length of the data chunk in bytes, with the size sentinel
    /// already replaced by the measured remainder of the stream.
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    /// Stream offset of the first payload byte of the data chunk.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of frames (one sample per channel) in the data chunk. A
    /// trailing partial frame is ignored.
    pub fn frame_count(&self) -> u64 {
        if !self.initialized {
            return 0;
        }
        self.data_len / (self.bits_per_sample / 8) as u64 / self.channels as u64
    }

    /// Size of one frame in bytes.
    pub fn frame_size(&self) -> usize {
        (self.bits_per_sample / 8) as usize * self.channels as usize
    }

    /// Audio duration derived from the frame count.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_count() as f64 / SAMPLE_RATE as f64)
    }

    fn check_channel(&self, channel: u16) -> Result<()> {
        if channel >= self.channels {
            return Err(MurmurError::InvalidArgument(format!(
                "channel index {} out of range for {} channel(s)",
                channel, self.channels
            )));
        }
        Ok(())
    }

    fn apply_format(&mut self, fmt: &[u8]) -> Result<()> {
        let (channels, sample_rate, bits_per_sample) = parse_format_chunk(fmt)?;
        self.channels = channels;
        self.sample_rate = sample_rate;
        self.bits_per_sample = bits_per_sample;
        Ok(())
    }

    fn finish_initialize(&mut self) {
        self.initialized = true;
        debug!(
            "wave container initialized: {} channel(s), {} Hz, {} bits, {} frames",
            self.channels,
            self.sample_rate,
            self.bits_per_sample,
            self.frame_count()
        );
    }
}

impl<R: Read + Seek> WaveReader<R> {
    /// Read and validate the container header. Idempotent.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let mut header = [0u8; 12];
        read_exact_or(&mut self.stream, &mut header, "RIFF header")?;
        check_riff_header(&header)?;

        // Scan chunks for "fmt ", skipping anything else.
        let fmt_size = loop {
            let mut chunk = [0u8; 8];
            read_exact_or(&mut self.stream, &mut chunk, "chunk header")?;
            let size = chunk_size_checked(&chunk)?;
            if &chunk[0..4] == b"fmt " {
                break size;
            }
            self.stream.seek(SeekFrom::Current(size as i64))?;
        };

        if fmt_size < 16 {
            return Err(MurmurError::CorruptWave(format!(
                "format chunk is {} bytes, expected at least 16",
                fmt_size
            )));
        }

        let mut fmt = vec![0u8; fmt_size as usize];
        read_exact_or(&mut self.stream, &mut fmt, "format chunk")?;
        self.apply_format(&fmt)?;

        // Scan chunks for "data".
        loop {
            let mut chunk = [0u8; 8];
            read_exact_or(&mut self.stream, &mut chunk, "chunk header")?;
            if &chunk[0..4] == b"data" {
                let declared = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                let position = self.stream.stream_position()?;
                self.data_len = if declared == u32::MAX {
                    // Streamed writers leave the size as all ones; measure
                    // what is actually there instead.
                    let end = self.stream.seek(SeekFrom::End(0))?;
                    self.stream.seek(SeekFrom::Start(position))?;
                    end.saturating_sub(position)
                } else {
                    declared as u64
                };
                self.data_offset = position;
                break;
            }
            let size = chunk_size_checked(&chunk)?;
            self.stream.seek(SeekFrom::Current(size as i64))?;
        }

        self.finish_initialize();
        Ok(())
    }

    /// Decode the samples of a single channel, normalized to `f32`.
    pub fn channel_samples(&mut self, channel: u16) -> Result<Vec<f32>> {
        self.initialize()?;
        self.check_channel(channel)?;

        let divisor = depth_divisor(self.bits_per_sample);
        let bytes_per_sample = (self.bits_per_sample / 8) as usize;
        let bits = self.bits_per_sample;
        let offset = channel as usize * bytes_per_sample;

        let mut samples = Vec::with_capacity(self.frame_count() as usize);
        self.read_frames(|frame| {
            let value = decode_sample(&frame[offset..], bits);
            samples.push(value as f32 / divisor);
        })?;
        Ok(samples)
    }

    /// Decode all channels averaged into a mono signal. This is the form an
    /// inference pass consumes.
    pub fn mono_samples(&mut self) -> Result<Vec<f32>> {
        self.initialize()?;

        let divisor = depth_divisor(self.bits_per_sample);
        let bytes_per_sample = (self.bits_per_sample / 8) as usize;
        let bits = self.bits_per_sample;
        let channels = self.channels;

        let mut samples = Vec::with_capacity(self.frame_count() as usize);
        self.read_frames(|frame| {
            let mut sum = 0i64;
            for ch in 0..channels as usize {
                sum += decode_sample(&frame[ch * bytes_per_sample..], bits);
            }
            samples.push((sum as f32 / divisor) / channels as f32);
        })?;
        Ok(samples)
    }

    /// Drive `per_frame` over every declared frame of the data chunk, reading
    /// in whole-frame chunks. A short stream is a corrupt container.
    fn read_frames(&mut self, mut per_frame: impl FnMut(&[u8])) -> Result<()> {
        let frame_size = self.frame_size();
        let total = self.frame_count();
        self.stream.seek(SeekFrom::Start(self.data_offset))?;

        let mut buffer = vec![0u8; frame_size * FRAMES_PER_READ as usize];
        let mut remaining = total;
        while remaining > 0 {
            let frames = remaining.min(FRAMES_PER_READ) as usize;
            let bytes = &mut buffer[..frames * frame_size];
            self.stream.read_exact(bytes).map_err(short_data_error)?;
            for frame in bytes.chunks_exact(frame_size) {
                per_frame(frame);
            }
            remaining -= frames as u64;
        }
        Ok(())
    }
}

impl<R: AsyncRead + AsyncSeek + Unpin> WaveReader<R> {
    /// Async form of [`initialize`](WaveReader::initialize). Idempotent;
    /// checks `cancel` between buffered reads.
    pub async fn initialize_async(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let mut header = [0u8; 12];
        read_exact_or_async(&mut self.stream, &mut header, "RIFF header").await?;
        check_riff_header(&header)?;

        let fmt_size = loop {
            if cancel.is_cancelled() {
                return Err(MurmurError::Cancelled);
            }
            let mut chunk = [0u8; 8];
            read_exact_or_async(&mut self.stream, &mut chunk, "chunk header").await?;
            let size = chunk_size_checked(&chunk)?;
            if &chunk[0..4] == b"fmt " {
                break size;
            }
            self.stream.seek(SeekFrom::Current(size as i64)).await?;
        };

        if fmt_size < 16 {
            return Err(MurmurError::CorruptWave(format!(
                "format chunk is {} bytes, expected at least 16",
                fmt_size
            )));
        }

        let mut fmt = vec![0u8; fmt_size as usize];
        read_exact_or_async(&mut self.stream, &mut fmt, "format chunk").await?;
        self.apply_format(&fmt)?;

        loop {
            if cancel.is_cancelled() {
                return Err(MurmurError::Cancelled);
            }
            let mut chunk = [0u8; 8];
            read_exact_or_async(&mut self.stream, &mut chunk, "chunk header").await?;
            if &chunk[0..4] == b"data" {
                let declared = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                let position = self.stream.stream_position().await?;
                self.data_len = if declared == u32::MAX {
                    let end = self.stream.seek(SeekFrom::End(0)).await?;
                    self.stream.seek(SeekFrom::Start(position)).await?;
                    end.saturating_sub(position)
                } else {
                    declared as u64
                };
                self.data_offset = position;
                break;
            }
            let size = chunk_size_checked(&chunk)?;
            self.stream.seek(SeekFrom::Current(size as i64)).await?;
        }

        self.finish_initialize();
        Ok(())
    }

    /// Async form of [`channel_samples`](WaveReader::channel_samples).
    pub async fn channel_samples_async(
        &mut self,
        channel: u16,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>> {
        self.initialize_async(cancel).await?;
        self.check_channel(channel)?;

        let divisor = depth_divisor(self.bits_per_sample);
        let bytes_per_sample = (self.bits_per_sample / 8) as usize;
        let bits = self.bits_per_sample;
        let offset = channel as usize * bytes_per_sample;

        let mut samples = Vec::with_capacity(self.frame_count() as usize);
        self.read_frames_async(cancel, |frame| {
            let value = decode_sample(&frame[offset..], bits);
            samples.push(value as f32 / divisor);
        })
        .await?;
        Ok(samples)
    }

    /// Async form of [`mono_samples`](WaveReader::mono_samples).
    pub async fn mono_samples_async(&mut self, cancel: &CancellationToken) -> Result<Vec<f32>> {
        self.initialize_async(cancel).await?;

        let divisor = depth_divisor(self.bits_per_sample);
        let bytes_per_sample = (self.bits_per_sample / 8) as usize;
        let bits = self.bits_per_sample;
        let channels = self.channels;

        let mut samples = Vec::with_capacity(self.frame_count() as usize);
        self.read_frames_async(cancel, |frame| {
            let mut sum = 0i64;
            for ch in 0..channels as usize {
                sum += decode_sample(&frame[ch * bytes_per_sample..], bits);
            }
            samples.push((sum as f32 / divisor) / channels as f32);
        })
        .await?;
        Ok(samples)
    }

    async fn read_frames_async(
        &mut self,
        cancel: &CancellationToken,
        mut per_frame: impl FnMut(&[u8]),
    ) -> Result<()> {
        let frame_size = self.frame_size();
        let total = self.frame_count();
        self.stream.seek(SeekFrom::Start(self.data_offset)).await?;

        let mut buffer = vec![0u8; frame_size * FRAMES_PER_READ as usize];
        let mut remaining = total;
        while remaining > 0 {
            if cancel.is_cancelled() {
                return Err(MurmurError::Cancelled);
            }
            let frames = remaining.min(FRAMES_PER_READ) as usize;
            let bytes = &mut buffer[..frames * frame_size];
            self.stream
                .read_exact(bytes)
                .await
                .map_err(short_data_error)?;
            for frame in bytes.chunks_exact(frame_size) {
                per_frame(frame);
            }
            remaining -= frames as u64;
        }
        Ok(())
    }
}

fn check_riff_header(header: &[u8; 12]) -> Result<()> {
    if &header[0..4] != b"RIFF" {
        return Err(MurmurError::CorruptWave(
            "invalid RIFF header".to_string(),
        ));
    }
    // Bytes 4..8 carry the overall file size and are not validated.
    if &header[8..12] != b"WAVE" {
        return Err(MurmurError::CorruptWave(
            "invalid WAVE header".to_string(),
        ));
    }
    Ok(())
}

/// Chunk sizes are written as u32 but the format treats them as signed;
/// anything with the top bit set is a broken writer, not a huge chunk.
fn chunk_size_checked(chunk: &[u8; 8]) -> Result<u32> {
    let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
    if size > i32::MAX as u32 {
        return Err(MurmurError::CorruptWave(format!(
            "invalid chunk size {}",
            size as i32
        )));
    }
    Ok(size)
}

/// Parse and validate a format chunk payload of at least 16 bytes.
/// Returns `(channels, sample_rate, bits_per_sample)`.
fn parse_format_chunk(fmt: &[u8]) -> Result<(u16, u32, u16)> {
    let format = u16::from_le_bytes([fmt[0], fmt[1]]);
    match format {
        WAVE_FORMAT_PCM => {}
        WAVE_FORMAT_EXTENSIBLE => {
            if fmt.len() < 40 {
                return Err(MurmurError::CorruptWave(format!(
                    "extensible format chunk is {} bytes, expected at least 40",
                    fmt.len()
                )));
            }
            if fmt[24..40] != PCM_SUBFORMAT_GUID {
                return Err(MurmurError::UnsupportedWave(
                    "extensible sub-format is not PCM".to_string(),
                ));
            }
        }
        other => {
            return Err(MurmurError::UnsupportedWave(format!(
                "format code {} is not PCM",
                other
            )));
        }
    }

    let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
    let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
    let bits_per_sample = u16::from_le_bytes([fmt[14], fmt[15]]);

    if channels == 0 {
        return Err(MurmurError::UnsupportedWave(
            "container declares zero channels".to_string(),
        ));
    }
    if sample_rate != SAMPLE_RATE {
        return Err(MurmurError::UnsupportedWave(format!(
            "sample rate is {} Hz, expected {} Hz",
            sample_rate, SAMPLE_RATE
        )));
    }
    if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
        return Err(MurmurError::UnsupportedWave(format!(
            "unsupported bit depth {}",
            bits_per_sample
        )));
    }

    Ok((channels, sample_rate, bits_per_sample))
}

/// Decode one sample at the start of `bytes` as a sign-extended integer.
fn decode_sample(bytes: &[u8], bits_per_sample: u16) -> i64 {
    match bits_per_sample {
        8 => bytes[0] as i64 - 128,
        16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        // Widen to 32 bits with the sample in the top three bytes, then
        // arithmetic-shift back down to sign-extend.
        24 => (i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8) as i64,
        _ => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
    }
}

/// Divisor that maps a raw integer sample of the given depth to [-1.0, 1.0).
const fn depth_divisor(bits_per_sample: u16) -> f32 {
    match bits_per_sample {
        8 => 128.0,
        16 => 32768.0,
        24 => 8_388_608.0,
        _ => 2_147_483_648.0,
    }
}

fn short_data_error(err: std::io::Error) -> MurmurError {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof => MurmurError::CorruptWave(
            "data chunk too small to hold all declared samples".to_string(),
        ),
        _ => MurmurError::Io(err),
    }
}

fn read_exact_or<R: Read>(stream: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    stream.read_exact(buf).map_err(|err| match err.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            MurmurError::CorruptWave(format!("stream ended while reading {}", what))
        }
        _ => MurmurError::Io(err),
    })
}

async fn read_exact_or_async<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<()> {
    stream
        .read_exact(buf)
        .await
        .map(|_| ())
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                MurmurError::CorruptWave(format!("stream ended while reading {}", what))
            }
            _ => MurmurError::Io(err),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_8_bit_around_midpoint() {
        assert_eq!(decode_sample(&[128], 8), 0);
        assert_eq!(decode_sample(&[0], 8), -128);
        assert_eq!(decode_sample(&[255], 8), 127);
    }

    #[test]
    fn decodes_16_bit_little_endian() {
        assert_eq!(decode_sample(&[0x00, 0x80], 16), i16::MIN as i64);
        assert_eq!(decode_sample(&[0xff, 0x7f], 16), i16::MAX as i64);
        assert_eq!(decode_sample(&[0x01, 0x00], 16), 1);
    }

    #[test]
    fn decodes_24_bit_with_sign_extension() {
        assert_eq!(decode_sample(&[0x00, 0x00, 0x80], 24), -8_388_608);
        assert_eq!(decode_sample(&[0xff, 0xff, 0x7f], 24), 8_388_607);
        assert_eq!(decode_sample(&[0xff, 0xff, 0xff], 24), -1);
        assert_eq!(decode_sample(&[0x02, 0x01, 0x00], 24), 258);
    }

    #[test]
    fn decodes_32_bit_little_endian() {
        assert_eq!(decode_sample(&[0, 0, 0, 0x80], 32), i32::MIN as i64);
        assert_eq!(decode_sample(&[0xff, 0xff, 0xff, 0x7f], 32), i32::MAX as i64);
    }

    #[test]
    fn divisor_matches_depth() {
        assert_eq!(depth_divisor(8), 128.0);
        assert_eq!(depth_divisor(16), 32768.0);
        assert_eq!(depth_divisor(24), 8_388_608.0);
        assert_eq!(depth_divisor(32), 2_147_483_648.0);
    }

    #[test]
    fn format_chunk_requires_pcm_code() {
        let mut fmt = [0u8; 16];
        fmt[0..2].copy_from_slice(&3u16.to_le_bytes()); // IEEE float
        fmt[2..4].copy_from_slice(&1u16.to_le_bytes());
        fmt[4..8].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
        fmt[14..16].copy_from_slice(&32u16.to_le_bytes());
        assert!(matches!(
            parse_format_chunk(&fmt),
            Err(MurmurError::UnsupportedWave(_))
        ));
    }

    #[test]
    fn extensible_format_requires_pcm_guid() {
        let mut fmt = [0u8; 40];
        fmt[0..2].copy_from_slice(&WAVE_FORMAT_EXTENSIBLE.to_le_bytes());
        fmt[2..4].copy_from_slice(&2u16.to_le_bytes());
        fmt[4..8].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
        fmt[14..16].copy_from_slice(&16u16.to_le_bytes());
        fmt[24..40].copy_from_slice(&PCM_SUBFORMAT_GUID);
        assert!(parse_format_chunk(&fmt).is_ok());

        fmt[24] = 0x03; // IEEE float sub-format
        assert!(matches!(
            parse_format_chunk(&fmt),
            Err(MurmurError::UnsupportedWave(_))
        ));
    }

    #[test]
    fn truncated_extensible_format_is_corrupt() {
        let mut fmt = [0u8; 20];
        fmt[0..2].copy_from_slice(&WAVE_FORMAT_EXTENSIBLE.to_le_bytes());
        assert!(matches!(
            parse_format_chunk(&fmt),
            Err(MurmurError::CorruptWave(_))
        ));
    }

    #[test]
    fn rejects_rates_other_than_16k() {
        let mut fmt = [0u8; 16];
        fmt[0..2].copy_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
        fmt[2..4].copy_from_slice(&1u16.to_le_bytes());
        fmt[4..8].copy_from_slice(&44_100u32.to_le_bytes());
        fmt[14..16].copy_from_slice(&16u16.to_le_bytes());
        assert!(matches!(
            parse_format_chunk(&fmt),
            Err(MurmurError::UnsupportedWave(_))
        ));
    }
}
