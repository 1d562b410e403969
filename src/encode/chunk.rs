/// Codec-specific decoder configuration carried by the first chunk of a track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecoderConfig {
    /// `AVCDecoderConfigurationRecord` (body of the `avcC` box).
    Avc(Vec<u8>),
    /// `HEVCDecoderConfigurationRecord` (body of the `hvcC` box).
    Hevc(Vec<u8>),
    /// AAC `AudioSpecificConfig` (decoder specific info inside `esds`).
    Aac(Vec<u8>),
}

/// One compressed sample produced by an encoder.
///
/// Timing is expressed in ticks of the owning track's timescale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Sample payload. Video samples are 4-byte length-prefixed NAL units; audio samples are raw
    /// AAC access units.
    pub data: Vec<u8>,
    /// Presentation (= decode) timestamp in track ticks.
    pub timestamp: u64,
    /// Sample duration in track ticks.
    pub duration: u32,
    /// Random access point.
    pub is_key: bool,
    /// Decoder configuration, present on the first chunk of a track.
    pub config: Option<DecoderConfig>,
}
