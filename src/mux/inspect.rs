//! Minimal MP4 reader used to summarize exported files.
//!
//! Only the boxes this crate writes are understood; anything else is skipped.

use crate::foundation::error::{ExportError, ExportResult};

/// Summary of one track.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct TrackInfo {
    /// Track id from `tkhd`.
    pub track_id: u32,
    /// Handler type (`vide` / `soun`).
    pub handler: String,
    /// Sample entry fourcc (`avc1`, `hvc1`, `mp4a`).
    pub sample_entry: String,
    /// Media timescale.
    pub timescale: u32,
    /// Media duration in timescale ticks.
    pub media_duration: u64,
    /// Width in pixels (video).
    pub width: u16,
    /// Height in pixels (video).
    pub height: u16,
    /// Channel count (audio).
    pub channels: u16,
    /// Sample rate in Hz (audio).
    pub sample_rate: u32,
    /// Per-sample byte sizes.
    pub sample_sizes: Vec<u32>,
    /// Per-sample durations expanded from `stts`.
    pub sample_durations: Vec<u32>,
    /// 1-based sync sample numbers, `None` when every sample is a sync sample.
    pub sync_samples: Option<Vec<u32>>,
    /// Absolute file offset of every sample.
    pub sample_offsets: Vec<u64>,
    /// Offset tables use 64-bit entries.
    pub co64: bool,
    /// First edit list entry as `(segment_duration, media_time)`.
    pub edit: Option<(u64, i64)>,
    /// Raw decoder configuration record (`avcC` / `hvcC` body or AAC `AudioSpecificConfig`).
    pub decoder_config: Vec<u8>,
}

impl TrackInfo {
    /// Number of samples.
    pub fn sample_count(&self) -> usize {
        self.sample_sizes.len()
    }

    /// Bytes of sample `index` within `file`.
    pub fn sample<'a>(&self, file: &'a [u8], index: usize) -> Option<&'a [u8]> {
        let start = usize::try_from(*self.sample_offsets.get(index)?).ok()?;
        let len = *self.sample_sizes.get(index)? as usize;
        file.get(start..start.checked_add(len)?)
    }

    /// Samples presented after applying the edit list, in timescale ticks.
    pub fn presented_duration(&self, movie_timescale: u32) -> u64 {
        match self.edit {
            Some((segment, _)) if movie_timescale > 0 => {
                segment * u64::from(self.timescale) / u64::from(movie_timescale)
            }
            _ => self.media_duration,
        }
    }
}

/// Summary of an MP4 file.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Mp4Info {
    /// Top-level box types in file order.
    pub top_level: Vec<String>,
    /// Major brand from `ftyp`.
    pub major_brand: String,
    /// Movie timescale from `mvhd`.
    pub movie_timescale: u32,
    /// Movie duration in movie timescale ticks.
    pub movie_duration: u64,
    /// Tracks in `moov` order.
    pub tracks: Vec<TrackInfo>,
}

impl Mp4Info {
    /// First track with the given handler type.
    pub fn track(&self, handler: &str) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.handler == handler)
    }

    /// The video track.
    pub fn video(&self) -> Option<&TrackInfo> {
        self.track("vide")
    }

    /// The audio track.
    pub fn audio(&self) -> Option<&TrackInfo> {
        self.track("soun")
    }
}

/// Parse the structure of an MP4 file held in memory.
pub fn probe_mp4(file: &[u8]) -> ExportResult<Mp4Info> {
    let mut info = Mp4Info::default();
    for b in boxes(file)? {
        info.top_level.push(fourcc(&b.kind));
        match &b.kind {
            b"ftyp" => {
                info.major_brand = fourcc(&read_array::<4>(b.body, 0)?);
            }
            b"moov" => parse_moov(b.body, &mut info)?,
            _ => {}
        }
    }
    if !info.top_level.iter().any(|k| k == "moov") {
        return Err(malformed("file has no moov box"));
    }
    Ok(info)
}

struct Bx<'a> {
    kind: [u8; 4],
    body: &'a [u8],
}

fn malformed(msg: impl std::fmt::Display) -> ExportError {
    ExportError::mux(format!("malformed mp4: {msg}"))
}

fn fourcc(kind: &[u8; 4]) -> String {
    String::from_utf8_lossy(kind).into_owned()
}

fn read_array<const N: usize>(buf: &[u8], at: usize) -> ExportResult<[u8; N]> {
    buf.get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| malformed(format!("truncated field at offset {at}")))
}

fn be_u16(buf: &[u8], at: usize) -> ExportResult<u16> {
    read_array::<2>(buf, at).map(u16::from_be_bytes)
}

fn be_u32(buf: &[u8], at: usize) -> ExportResult<u32> {
    read_array::<4>(buf, at).map(u32::from_be_bytes)
}

fn be_u64(buf: &[u8], at: usize) -> ExportResult<u64> {
    read_array::<8>(buf, at).map(u64::from_be_bytes)
}

fn boxes(buf: &[u8]) -> ExportResult<Vec<Bx<'_>>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        let size32 = be_u32(buf, pos)?;
        let kind = read_array::<4>(buf, pos + 4)?;
        let (header, size) = match size32 {
            0 => (8, (buf.len() - pos) as u64),
            1 => (16, be_u64(buf, pos + 8)?),
            n => (8, u64::from(n)),
        };
        let end = usize::try_from(size)
            .ok()
            .and_then(|s| pos.checked_add(s))
            .filter(|&end| end <= buf.len() && end >= pos + header)
            .ok_or_else(|| malformed(format!("box '{}' has an invalid size", fourcc(&kind))))?;
        out.push(Bx {
            kind,
            body: &buf[pos + header..end],
        });
        pos = end;
    }
    Ok(out)
}

fn child<'a>(buf: &'a [u8], kind: &[u8; 4]) -> ExportResult<Option<&'a [u8]>> {
    Ok(boxes(buf)?.into_iter().find(|b| &b.kind == kind).map(|b| b.body))
}

fn require<'a>(buf: &'a [u8], kind: &[u8; 4]) -> ExportResult<&'a [u8]> {
    child(buf, kind)?.ok_or_else(|| malformed(format!("missing '{}' box", fourcc(kind))))
}

fn parse_moov(moov: &[u8], info: &mut Mp4Info) -> ExportResult<()> {
    for b in boxes(moov)? {
        match &b.kind {
            b"mvhd" => {
                let version = b.body.first().copied().unwrap_or(0);
                if version == 1 {
                    info.movie_timescale = be_u32(b.body, 20)?;
                    info.movie_duration = be_u64(b.body, 24)?;
                } else {
                    info.movie_timescale = be_u32(b.body, 12)?;
                    info.movie_duration = u64::from(be_u32(b.body, 16)?);
                }
            }
            b"trak" => info.tracks.push(parse_trak(b.body)?),
            _ => {}
        }
    }
    Ok(())
}

fn parse_trak(trak: &[u8]) -> ExportResult<TrackInfo> {
    let mut t = TrackInfo::default();
    let tkhd = require(trak, b"tkhd")?;
    t.track_id = be_u32(tkhd, 12)?;

    if let Some(edts) = child(trak, b"edts")?
        && let Some(elst) = child(edts, b"elst")?
        && be_u32(elst, 4)? > 0
    {
        t.edit = Some(if elst[0] == 1 {
            (be_u64(elst, 8)?, be_u64(elst, 16)? as i64)
        } else {
            (u64::from(be_u32(elst, 8)?), i64::from(be_u32(elst, 12)? as i32))
        });
    }

    let mdia = require(trak, b"mdia")?;
    let mdhd = require(mdia, b"mdhd")?;
    if mdhd.first() == Some(&1) {
        t.timescale = be_u32(mdhd, 20)?;
        t.media_duration = be_u64(mdhd, 24)?;
    } else {
        t.timescale = be_u32(mdhd, 12)?;
        t.media_duration = u64::from(be_u32(mdhd, 16)?);
    }
    let hdlr = require(mdia, b"hdlr")?;
    t.handler = fourcc(&read_array::<4>(hdlr, 8)?);

    let stbl = require(require(mdia, b"minf")?, b"stbl")?;
    parse_stsd(require(stbl, b"stsd")?, &mut t)?;

    // One sample per chunk, so the offset table bounds every other per-sample table.
    let stsc = require(stbl, b"stsc")?;
    if be_u32(stsc, 4)? != 1 || be_u32(stsc, 12)? != 1 {
        return Err(malformed("only one sample per chunk is supported"));
    }
    if let Some(co64) = child(stbl, b"co64")? {
        t.co64 = true;
        let n = be_u32(co64, 4)? as usize;
        t.sample_offsets = (0..n).map(|i| be_u64(co64, 8 + i * 8)).collect::<Result<_, _>>()?;
    } else {
        let stco = require(stbl, b"stco")?;
        let n = be_u32(stco, 4)? as usize;
        t.sample_offsets = (0..n)
            .map(|i| be_u32(stco, 8 + i * 4).map(u64::from))
            .collect::<Result<_, _>>()?;
    }
    let samples = t.sample_offsets.len();
    let too_many = |table: &str| {
        malformed(format!(
            "track {} {table} describes more than its {samples} samples",
            t.track_id
        ))
    };

    let stts = require(stbl, b"stts")?;
    for i in 0..be_u32(stts, 4)? as usize {
        let count = be_u32(stts, 8 + i * 8)? as usize;
        let delta = be_u32(stts, 12 + i * 8)?;
        if count > samples - t.sample_durations.len() {
            return Err(too_many("stts"));
        }
        t.sample_durations.extend(std::iter::repeat_n(delta, count));
    }

    if let Some(stss) = child(stbl, b"stss")? {
        let n = be_u32(stss, 4)? as usize;
        t.sync_samples = Some((0..n).map(|i| be_u32(stss, 8 + i * 4)).collect::<Result<_, _>>()?);
    }

    let stsz = require(stbl, b"stsz")?;
    let fixed = be_u32(stsz, 4)?;
    let count = be_u32(stsz, 8)? as usize;
    if count > samples {
        return Err(too_many("stsz"));
    }
    t.sample_sizes = if fixed != 0 {
        vec![fixed; count]
    } else {
        (0..count)
            .map(|i| be_u32(stsz, 12 + i * 4))
            .collect::<Result<_, _>>()?
    };

    if t.sample_offsets.len() != t.sample_sizes.len()
        || t.sample_durations.len() != t.sample_sizes.len()
    {
        return Err(malformed(format!(
            "track {} sample tables disagree on the sample count",
            t.track_id
        )));
    }
    Ok(t)
}

fn parse_stsd(stsd: &[u8], t: &mut TrackInfo) -> ExportResult<()> {
    let entries = stsd
        .get(8..)
        .ok_or_else(|| malformed("truncated stsd"))?;
    let entry = boxes(entries)?
        .into_iter()
        .next()
        .ok_or_else(|| malformed("stsd has no sample entry"))?;
    t.sample_entry = fourcc(&entry.kind);
    match &entry.kind {
        b"avc1" | b"hvc1" | b"hev1" => {
            t.width = be_u16(entry.body, 24)?;
            t.height = be_u16(entry.body, 26)?;
            let children = entry.body.get(78..).ok_or_else(|| malformed("truncated sample entry"))?;
            let config = child(children, b"avcC")?.or(child(children, b"hvcC")?);
            t.decoder_config = config.unwrap_or_default().to_vec();
        }
        b"mp4a" => {
            t.channels = be_u16(entry.body, 16)?;
            t.sample_rate = be_u32(entry.body, 24)? >> 16;
            let children = entry.body.get(28..).ok_or_else(|| malformed("truncated sample entry"))?;
            if let Some(esds) = child(children, b"esds")? {
                t.decoder_config = find_descriptor(esds.get(4..).unwrap_or_default(), 0x05)
                    .unwrap_or_default()
                    .to_vec();
            }
        }
        _ => {}
    }
    Ok(())
}

/// Depth-first search for descriptor `tag` inside an `esds` payload.
fn find_descriptor(mut buf: &[u8], tag: u8) -> Option<&[u8]> {
    while let Some((&t, rest)) = buf.split_first() {
        let mut len = 0usize;
        let mut i = 0;
        loop {
            let b = *rest.get(i)?;
            len = (len << 7) | usize::from(b & 0x7f);
            i += 1;
            if b & 0x80 == 0 || i == 4 {
                break;
            }
        }
        let body = rest.get(i..i + len)?;
        if t == tag {
            return Some(body);
        }
        let nested = match t {
            // ES_Descriptor: ES_ID + flags precede the nested descriptors.
            0x03 => body.get(3..),
            // DecoderConfigDescriptor: 13 fixed bytes.
            0x04 => body.get(13..),
            _ => None,
        };
        if let Some(found) = nested.and_then(|n| find_descriptor(n, tag)) {
            return Some(found);
        }
        buf = rest.get(i + len..)?;
    }
    None
}

#[cfg(test)]
#[path = "../../tests/unit/mux/inspect.rs"]
mod tests;
