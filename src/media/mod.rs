//! Media handling
//!
//! This module provides:
//! - ISO BMFF box encoding and decoding
//! - H.264 NAL unit classification and decoder configuration
//! - Fragmented MP4 initialization and media segment assembly

pub mod bmff;
pub mod h264;
pub mod segment;

pub use bmff::{BoxBody, BoxIter, FourCc, Mp4Box};
pub use h264::{classify, AvcConfig, CodedFrame, FrameInfo, NaluType};
pub use segment::{
    build_init_segment, build_media_segment, decode_time, InitSegmentCache, StreamConfig,
};
