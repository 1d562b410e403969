//! Annex B elementary stream handling for encoder output.
//!
//! The ffmpeg video encoder writes a raw H.264/HEVC byte stream with access unit delimiters.
//! This module splits it into NAL units, groups them into access units, converts each access
//! unit to the 4-byte length-prefixed layout MP4 expects, and builds the `avcC` / `hvcC` decoder
//! configuration records from the in-band parameter sets.

use crate::encode::chunk::{DecoderConfig, EncodedChunk};
use crate::encode::config::VideoCodec;

/// Incremental splitter for start-code delimited NAL units.
#[derive(Debug, Default)]
pub(crate) struct NalSplitter {
    buf: Vec<u8>,
    scan_from: usize,
    in_nal: bool,
}

impl NalSplitter {
    /// Feed bytes; completed NAL units are appended to `out`.
    pub(crate) fn push(&mut self, bytes: &[u8], out: &mut Vec<Vec<u8>>) {
        self.buf.extend_from_slice(bytes);
        let mut i = self.scan_from;
        while i + 3 <= self.buf.len() {
            if self.buf[i] == 0 && self.buf[i + 1] == 0 && self.buf[i + 2] == 1 {
                if self.in_nal {
                    push_trimmed(&self.buf[..i], out);
                }
                self.buf.drain(..i + 3);
                self.in_nal = true;
                i = 0;
                continue;
            }
            i += 1;
        }
        // A start code may straddle the next push.
        self.scan_from = self.buf.len().saturating_sub(2);
        if !self.in_nal && self.scan_from > 0 {
            self.buf.drain(..self.scan_from);
            self.scan_from = 0;
        }
    }

    /// Flush the trailing NAL unit at end of stream.
    pub(crate) fn finish(&mut self, out: &mut Vec<Vec<u8>>) {
        if self.in_nal {
            push_trimmed(&self.buf, out);
        }
        self.buf.clear();
        self.scan_from = 0;
        self.in_nal = false;
    }
}

fn push_trimmed(nal: &[u8], out: &mut Vec<Vec<u8>>) {
    let end = nal.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    if end > 0 {
        out.push(nal[..end].to_vec());
    }
}

/// Role of a NAL unit within an access unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NalRole {
    Delimiter,
    Vps,
    Sps,
    Pps,
    KeySlice,
    Other,
}

/// Classify a NAL unit by its header.
pub(crate) fn nal_role(codec: VideoCodec, nal: &[u8]) -> NalRole {
    let Some(&first) = nal.first() else {
        return NalRole::Other;
    };
    match codec {
        VideoCodec::H264 => match first & 0x1f {
            9 => NalRole::Delimiter,
            7 => NalRole::Sps,
            8 => NalRole::Pps,
            5 => NalRole::KeySlice,
            _ => NalRole::Other,
        },
        VideoCodec::Hevc => match (first >> 1) & 0x3f {
            35 => NalRole::Delimiter,
            32 => NalRole::Vps,
            33 => NalRole::Sps,
            34 => NalRole::Pps,
            16..=21 => NalRole::KeySlice,
            _ => NalRole::Other,
        },
    }
}

/// Strip emulation prevention bytes (`00 00 03` -> `00 00`).
pub(crate) fn unescape_rbsp(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0usize;
    for &b in nal {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

/// Build an `AVCDecoderConfigurationRecord` from one SPS and one PPS.
pub(crate) fn avcc_record(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>, String> {
    if sps.len() < 4 {
        return Err("H.264 SPS is truncated".to_owned());
    }
    let profile = sps[1];
    let mut rec = vec![1, profile, sps[2], sps[3], 0xff, 0xe1];
    rec.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    rec.extend_from_slice(sps);
    rec.push(1);
    rec.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    rec.extend_from_slice(pps);
    if matches!(profile, 100 | 110 | 122 | 144) {
        // 4:2:0, 8-bit luma and chroma, no SPS extensions.
        rec.extend_from_slice(&[0xfc | 1, 0xf8, 0xf8, 0]);
    }
    Ok(rec)
}

/// Build an `HEVCDecoderConfigurationRecord` from VPS, SPS and PPS.
pub(crate) fn hvcc_record(vps: &[u8], sps: &[u8], pps: &[u8]) -> Result<Vec<u8>, String> {
    let rbsp = unescape_rbsp(sps);
    // 2-byte NAL header, 1 byte of vps id / max sub layers / nesting flag, then the 12-byte
    // general profile_tier_level prefix.
    if rbsp.len() < 15 {
        return Err("HEVC SPS is truncated".to_owned());
    }
    let max_sub_layers = ((rbsp[2] >> 1) & 0x07) + 1;
    let temporal_id_nested = rbsp[2] & 0x01;
    let ptl = &rbsp[3..15];

    let mut rec = Vec::with_capacity(23 + vps.len() + sps.len() + pps.len() + 15);
    rec.push(1);
    rec.extend_from_slice(ptl);
    rec.extend_from_slice(&[0xf0, 0x00]); // min_spatial_segmentation_idc = 0
    rec.push(0xfc); // parallelismType = 0
    rec.push(0xfc | 1); // chroma_format_idc = 1 (4:2:0)
    rec.push(0xf8); // bit_depth_luma_minus8 = 0
    rec.push(0xf8); // bit_depth_chroma_minus8 = 0
    rec.extend_from_slice(&[0, 0]); // avgFrameRate unspecified
    rec.push((max_sub_layers << 3) | (temporal_id_nested << 2) | 0x03);
    rec.push(3);
    for (nal_type, nal) in [(32u8, vps), (33, sps), (34, pps)] {
        rec.push(0x80 | nal_type);
        rec.extend_from_slice(&1u16.to_be_bytes());
        rec.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        rec.extend_from_slice(nal);
    }
    Ok(rec)
}

/// Groups NAL units into access units and emits MP4-ready chunks.
///
/// Access units are delimited by AUD NAL units. Decode order equals presentation order because
/// the encoder runs without B-frames, so chunk `n` gets timestamp `n * frame_ticks`.
#[derive(Debug)]
pub(crate) struct AccessUnitAssembler {
    codec: VideoCodec,
    frame_ticks: u32,
    splitter: NalSplitter,
    current: Vec<Vec<u8>>,
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    emitted: u64,
    config_sent: bool,
}

impl AccessUnitAssembler {
    pub(crate) fn new(codec: VideoCodec, frame_ticks: u32) -> Self {
        Self {
            codec,
            frame_ticks,
            splitter: NalSplitter::default(),
            current: Vec::new(),
            vps: None,
            sps: None,
            pps: None,
            emitted: 0,
            config_sent: false,
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8], out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        let mut nals = Vec::new();
        self.splitter.push(bytes, &mut nals);
        self.accept(nals, out)
    }

    pub(crate) fn finish(&mut self, out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        let mut nals = Vec::new();
        self.splitter.finish(&mut nals);
        self.accept(nals, out)?;
        self.complete_unit(out)
    }

    /// Number of access units emitted so far.
    pub(crate) fn emitted(&self) -> u64 {
        self.emitted
    }

    fn accept(&mut self, nals: Vec<Vec<u8>>, out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        for nal in nals {
            if nal_role(self.codec, &nal) == NalRole::Delimiter {
                self.complete_unit(out)?;
                continue;
            }
            self.current.push(nal);
        }
        Ok(())
    }

    fn complete_unit(&mut self, out: &mut Vec<EncodedChunk>) -> Result<(), String> {
        if self.current.is_empty() {
            return Ok(());
        }
        let nals = std::mem::take(&mut self.current);
        let mut data = Vec::new();
        let mut is_key = false;
        let mut has_slice = false;
        for nal in nals {
            match nal_role(self.codec, &nal) {
                NalRole::Vps => self.vps = Some(nal),
                NalRole::Sps => self.sps = Some(nal),
                NalRole::Pps => self.pps = Some(nal),
                role => {
                    is_key |= role == NalRole::KeySlice;
                    has_slice |= is_vcl(self.codec, &nal);
                    data.extend_from_slice(&(nal.len() as u32).to_be_bytes());
                    data.extend_from_slice(&nal);
                }
            }
        }
        if !has_slice {
            // Parameter sets / SEI only; they belong to the next picture.
            return Ok(());
        }

        let config = if self.config_sent {
            None
        } else {
            if !is_key {
                return Err("encoder output does not start with a keyframe".to_owned());
            }
            self.config_sent = true;
            Some(self.decoder_config()?)
        };

        out.push(EncodedChunk {
            data,
            timestamp: self.emitted * u64::from(self.frame_ticks),
            duration: self.frame_ticks,
            is_key,
            config,
        });
        self.emitted += 1;
        Ok(())
    }

    fn decoder_config(&self) -> Result<DecoderConfig, String> {
        let missing = || "encoder output is missing parameter sets".to_owned();
        let sps = self.sps.as_deref().ok_or_else(missing)?;
        let pps = self.pps.as_deref().ok_or_else(missing)?;
        match self.codec {
            VideoCodec::H264 => Ok(DecoderConfig::Avc(avcc_record(sps, pps)?)),
            VideoCodec::Hevc => {
                let vps = self.vps.as_deref().ok_or_else(missing)?;
                Ok(DecoderConfig::Hevc(hvcc_record(vps, sps, pps)?))
            }
        }
    }
}

fn is_vcl(codec: VideoCodec, nal: &[u8]) -> bool {
    let Some(&first) = nal.first() else {
        return false;
    };
    match codec {
        VideoCodec::H264 => matches!(first & 0x1f, 1..=5),
        VideoCodec::Hevc => ((first >> 1) & 0x3f) < 32,
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/annexb.rs"]
mod tests;
