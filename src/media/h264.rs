//! H.264/AVC frame classification
//!
//! The capture side delivers one NAL unit per coded frame, already stripped
//! of its Annex B start code. The low five bits of the first byte give the
//! NAL unit type:
//!
//! ```text
//! +---+-------+-----------+
//! | F |  NRI  |   Type    |
//! | 1 |   2   |     5     |
//! +---+-------+-----------+
//! ```
//!
//! Types 1-5 carry picture data (VCL) and become one media sample each;
//! type 5 is an IDR picture. Everything else (SPS, PPS, SEI, delimiters)
//! is never forwarded per frame. The parameter sets are folded into the
//! `avcC` record of the initialization segment instead.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MediaError;

/// Largest frame whose `mdat` box and `trun` sample size fit 32 bits
pub const MAX_FRAME_SIZE: usize = u32::MAX as usize - 12;

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_vcl(&self) -> bool {
        (*self as u8) <= NaluType::Idr as u8
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// Classification of one coded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Raw NAL unit type, 0..=31
    pub unit_type: u8,
    /// Carries picture data (types 1-5)
    pub is_vcl: bool,
    /// IDR picture (type 5)
    pub is_keyframe: bool,
}

impl FrameInfo {
    /// Classify from the NAL header byte
    pub fn from_header(header: u8) -> Self {
        let unit_type = header & 0x1F;
        Self {
            unit_type,
            is_vcl: (1..=5).contains(&unit_type),
            is_keyframe: unit_type == NaluType::Idr as u8,
        }
    }
}

/// A validated coded frame: one NAL unit, non-empty, 32-bit sized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedFrame {
    data: Bytes,
}

impl CodedFrame {
    /// Validate raw NAL unit bytes.
    ///
    /// Zero-length input has no header byte to classify and is rejected
    /// here so it can never reach the box encoder.
    pub fn new(data: Bytes) -> Result<Self, MediaError> {
        if data.is_empty() {
            return Err(MediaError::EmptyFrame);
        }
        if data.len() > MAX_FRAME_SIZE {
            return Err(MediaError::FrameTooLarge(data.len()));
        }
        Ok(Self { data })
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// First byte of the NAL unit
    pub fn header(&self) -> u8 {
        self.data[0]
    }

    pub fn info(&self) -> FrameInfo {
        classify(self)
    }

    pub fn nalu_type(&self) -> Option<NaluType> {
        NaluType::from_byte(self.header())
    }
}

/// Derive unit type, VCL membership and key-frame status from a frame
pub fn classify(frame: &CodedFrame) -> FrameInfo {
    FrameInfo::from_header(frame.header())
}

/// AVC decoder configuration for the initialization segment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 40 = 4.0)
    pub level: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Bytes>,
    /// Picture Parameter Sets
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Build from parameter sets, reading profile and level from the first SPS.
    ///
    /// SPS layout after the NAL header: `profile_idc`, constraint flags,
    /// `level_idc`.
    pub fn from_parameter_sets(sps: Vec<Bytes>, pps: Vec<Bytes>) -> Result<Self, MediaError> {
        let first = sps.first().ok_or(MediaError::InvalidParameterSet)?;
        if first.len() < 4 || pps.is_empty() || pps.iter().any(|p| p.is_empty()) {
            return Err(MediaError::InvalidParameterSet);
        }
        if sps.len() > 0x1F || pps.len() > 0xFF {
            return Err(MediaError::InvalidParameterSet);
        }
        if sps.iter().chain(pps.iter()).any(|p| p.len() > u16::MAX as usize) {
            return Err(MediaError::InvalidParameterSet);
        }

        Ok(Self {
            profile: first[1],
            compatibility: first[2],
            level: first[3],
            sps,
            pps,
        })
    }

    /// Serialize as an AVCDecoderConfigurationRecord (`avcC` payload)
    ///
    /// ```text
    /// version (1) | profile (1) | compatibility (1) | level (1)
    /// | 0b111111 + lengthSizeMinusOne (1) | 0b111 + numOfSPS (1)
    /// | { spsLength (2) | sps }* | numOfPPS (1) | { ppsLength (2) | pps }*
    /// ```
    pub fn decoder_config_record(&self) -> Bytes {
        let size = 7
            + self.sps.iter().map(|s| 2 + s.len()).sum::<usize>()
            + self.pps.iter().map(|p| 2 + p.len()).sum::<usize>();
        let mut buf = BytesMut::with_capacity(size);

        buf.put_u8(1);
        buf.put_u8(self.profile);
        buf.put_u8(self.compatibility);
        buf.put_u8(self.level);
        // 4-byte NALU length prefixes
        buf.put_u8(0xFF);

        buf.put_u8(0xE0 | self.sps.len() as u8);
        for sps in &self.sps {
            buf.put_u16(sps.len() as u16);
            buf.put_slice(sps);
        }

        buf.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            buf.put_u16(pps.len() as u16);
            buf.put_slice(pps);
        }

        buf.freeze()
    }

    /// RFC 6381 codec parameter, e.g. `avc1.640028`
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }

    /// Get profile name
    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    /// Get level as string (e.g., "4.0")
    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }
}
