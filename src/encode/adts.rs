//! ADTS framing for AAC encoder output.

use crate::encode::chunk::{DecoderConfig, EncodedChunk};

/// Samples per channel in one AAC-LC access unit.
pub const AAC_FRAME_SAMPLES: u32 = 1024;

const SAMPLING_FREQUENCIES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// MPEG-4 sampling frequency index for `sample_rate`, if it has one.
pub fn sampling_frequency_index(sample_rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&f| f == sample_rate)
        .map(|i| i as u8)
}

/// Two-byte `AudioSpecificConfig` for AAC-LC.
pub fn audio_specific_config(sample_rate: u32, channels: u16) -> Option<[u8; 2]> {
    let freq = sampling_frequency_index(sample_rate)?;
    let object_type = 2u8; // AAC LC
    let ch = (channels & 0x0f) as u8;
    Some([(object_type << 3) | (freq >> 1), ((freq & 1) << 7) | (ch << 3)])
}

/// Parsed fixed + variable ADTS header fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AdtsHeader {
    pub(crate) object_type: u8,
    pub(crate) freq_index: u8,
    pub(crate) channel_config: u8,
    pub(crate) header_len: usize,
    pub(crate) frame_len: usize,
    pub(crate) raw_blocks: u8,
}

/// Parse an ADTS header at the start of `buf` (needs at least 7 bytes).
pub(crate) fn parse_header(buf: &[u8]) -> Result<AdtsHeader, String> {
    if buf.len() < 7 {
        return Err("truncated ADTS header".to_owned());
    }
    if buf[0] != 0xff || buf[1] & 0xf0 != 0xf0 {
        return Err("lost ADTS sync word".to_owned());
    }
    let protection_absent = buf[1] & 0x01 == 1;
    let header_len = if protection_absent { 7 } else { 9 };
    let frame_len = (usize::from(buf[3] & 0x03) << 11)
        | (usize::from(buf[4]) << 3)
        | usize::from(buf[5] >> 5);
    if frame_len < header_len {
        return Err(format!("ADTS frame length {frame_len} is shorter than its header"));
    }
    Ok(AdtsHeader {
        object_type: (buf[2] >> 6) + 1,
        freq_index: (buf[2] >> 2) & 0x0f,
        channel_config: ((buf[2] & 0x01) << 2) | (buf[3] >> 6),
        header_len,
        frame_len,
        raw_blocks: (buf[6] & 0x03) + 1,
    })
}

/// Incremental ADTS parser turning an AAC byte stream into MP4 audio samples.
///
/// Chunk timing is in samples (the audio track timescale is the sample rate).
#[derive(Debug, Default)]
pub(crate) struct AdtsParser {
    buf: Vec<u8>,
    next_timestamp: u64,
    config_sent: bool,
}

impl AdtsParser {
    pub(crate) fn push(&mut self, bytes: &[u8], out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        self.buf.extend_from_slice(bytes);
        let mut pos = 0;
        while self.buf.len() - pos >= 7 {
            let header = parse_header(&self.buf[pos..])?;
            if self.buf.len() - pos < header.frame_len {
                break;
            }
            if header.object_type != 2 {
                return Err(format!(
                    "encoder produced AAC object type {} instead of AAC-LC",
                    header.object_type
                ));
            }
            if header.raw_blocks != 1 {
                return Err("multiple raw data blocks per ADTS frame are not supported".to_owned());
            }
            let payload = self.buf[pos + header.header_len..pos + header.frame_len].to_vec();
            let config = if self.config_sent {
                None
            } else {
                self.config_sent = true;
                let f = header.freq_index;
                let c = header.channel_config;
                Some(DecoderConfig::Aac(vec![
                    (2 << 3) | (f >> 1),
                    ((f & 1) << 7) | (c << 3),
                ]))
            };
            out.push(EncodedChunk {
                data: payload,
                timestamp: self.next_timestamp,
                duration: AAC_FRAME_SAMPLES,
                is_key: true,
                config,
            });
            self.next_timestamp += u64::from(AAC_FRAME_SAMPLES);
            pos += header.frame_len;
        }
        self.buf.drain(..pos);
        Ok(())
    }

    pub(crate) fn finish(&mut self, _out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "AAC stream ended with {} bytes of a partial ADTS frame",
                self.buf.len()
            ))
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/adts.rs"]
mod tests;
