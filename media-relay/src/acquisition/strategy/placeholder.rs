//! Locally synthesized stand-in artifacts.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};

use crate::acquisition::{
    AcquisitionRequest, AcquisitionStrategy, MediaFormat, MediaInfo, StrategyContext,
    StrategyOutput,
};
use crate::Result;
use crate::utils::fs::io_error;

pub const PLACEHOLDER_NAME: &str = "placeholder";

/// MPEG-1 Layer III, 128 kbps, 44.1 kHz, mono, no CRC.
const MP3_FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0xC4];
/// `144 * 128000 / 44100`, unpadded.
const MP3_FRAME_LEN: usize = 417;
/// 1152 samples per frame, so 39 frames is just over one second.
const MP3_FRAME_COUNT: usize = 39;

const MVHD_TIMESCALE: u32 = 1000;

/// Roughly one second of silence. All-zero side information and main data
/// decode as silent frames.
pub fn silent_mp3() -> Vec<u8> {
    let mut out = Vec::with_capacity(MP3_FRAME_LEN * MP3_FRAME_COUNT);
    for _ in 0..MP3_FRAME_COUNT {
        out.extend_from_slice(&MP3_FRAME_HEADER);
        out.resize(out.len() + MP3_FRAME_LEN - MP3_FRAME_HEADER.len(), 0);
    }
    out
}

/// Smallest well-formed ISO-BMFF file: `ftyp`, a `moov` holding only
/// `mvhd`, and an empty `mdat`.
pub fn minimal_mp4() -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(152);

    // ftyp
    buf.put_u32(28);
    buf.put_slice(b"ftyp");
    buf.put_slice(b"isom");
    buf.put_u32(0x200);
    buf.put_slice(b"isom");
    buf.put_slice(b"iso2");
    buf.put_slice(b"mp41");

    // moov
    buf.put_u32(8 + 108);
    buf.put_slice(b"moov");

    // mvhd, version 0
    buf.put_u32(108);
    buf.put_slice(b"mvhd");
    buf.put_u32(0); // version + flags
    buf.put_u32(0); // creation time
    buf.put_u32(0); // modification time
    buf.put_u32(MVHD_TIMESCALE);
    buf.put_u32(MVHD_TIMESCALE); // duration: one second
    buf.put_u32(0x0001_0000); // rate 1.0
    buf.put_u16(0x0100); // volume 1.0
    buf.put_bytes(0, 10);
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        buf.put_u32(value);
    }
    buf.put_bytes(0, 24); // pre_defined
    buf.put_u32(1); // next track id

    // mdat
    buf.put_u32(8);
    buf.put_slice(b"mdat");

    buf.to_vec()
}

/// Writes a minimal valid file of the requested format without any network
/// or external tool.
#[derive(Debug, Default)]
pub struct PlaceholderStrategy;

impl PlaceholderStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AcquisitionStrategy for PlaceholderStrategy {
    fn name(&self) -> &str {
        PLACEHOLDER_NAME
    }

    async fn attempt(
        &self,
        ctx: &StrategyContext,
        request: &AcquisitionRequest,
    ) -> Result<StrategyOutput> {
        let data = match request.format {
            MediaFormat::Audio => silent_mp3(),
            MediaFormat::Video => minimal_mp4(),
        };
        let path = ctx.target.path.clone();
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| io_error("writing placeholder", &path, e))?;

        let info = MediaInfo {
            title: "Placeholder".to_string(),
            duration_secs: 1,
            ..MediaInfo::default()
        };
        Ok(StrategyOutput::new(path).with_info(info))
    }
}
