//! Fragmented MP4 segment assembly
//!
//! A viewer receives one initialization segment followed by one media
//! segment per forwarded frame:
//!
//! ```text
//! init:   ftyp  moov[mvhd trak[tkhd mdia[mdhd hdlr minf[vmhd dinf stbl]]] mvex[mehd trex]]
//! media:  moof[mfhd traf[tfhd tfdt trun]]  mdat[len(4) frame]
//! ```
//!
//! Each media segment carries exactly one sample. Its decode time is the
//! sample number times a fixed duration, so every viewer has its own
//! timeline starting at its first forwarded key frame.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use super::bmff::{Mp4Box, HEADER_LEN};
use super::h264::{AvcConfig, CodedFrame};

/// Movie header timescale (units per second)
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Video track timescale (units per second)
pub const TRACK_TIMESCALE: u32 = 10_000;

/// Duration of every sample, in track timescale units
pub const SAMPLE_DURATION: u32 = 330;

/// Frame interval that `SAMPLE_DURATION / TRACK_TIMESCALE` must express
pub const NOMINAL_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// The single video track
pub const TRACK_ID: u32 = 1;

/// Sample flags for an independently decodable sample
pub const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;

/// Sample flags for a sample that depends on others
pub const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

const HANDLER_NAME: &str = "mse-relay video handler";

// tfhd: default-base-is-moof | default-sample-flags-present
const TFHD_FLAGS: i64 = 0x02_0020;

// trun: data-offset | first-sample-flags | sample-duration | sample-size
const TRUN_FLAGS: i64 = 0x00_0305;

// trun with one sample: header + flags + count + offset + first flags + duration + size
const TRUN_LEN: usize = HEADER_LEN + 6 * 4;

// 3x3 unity matrix in 16.16 / 2.30 fixed point
const UNITY_MATRIX: [i64; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Static stream parameters shared by every viewer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamConfig {
    /// Frame width in pixels
    pub width: u16,
    /// Frame height in pixels
    pub height: u16,
    /// Profile, level and parameter sets
    pub avc: AvcConfig,
}

impl StreamConfig {
    pub fn new(width: u16, height: u16, avc: AvcConfig) -> Self {
        Self { width, height, avc }
    }
}

/// Decode time of sample `sequence`, in track timescale units
pub fn decode_time(sequence: u32) -> u64 {
    sequence as u64 * SAMPLE_DURATION as u64
}

/// Build the initialization segment (`ftyp` + `moov`) for a stream
pub fn build_init_segment(config: &StreamConfig) -> Bytes {
    encode_init(&ftyp(), &moov(config))
}

fn encode_init(ftyp: &Mp4Box, moov: &Mp4Box) -> Bytes {
    let mut buf = BytesMut::with_capacity(ftyp.encoded_len() + moov.encoded_len());
    ftyp.write_to(&mut buf);
    moov.write_to(&mut buf);
    buf.freeze()
}

/// Build the media segment (`moof` + `mdat`) carrying one frame
pub fn build_media_segment(sequence: u32, frame: &CodedFrame, is_keyframe: bool) -> Bytes {
    let sample_flags = if is_keyframe {
        SYNC_SAMPLE_FLAGS
    } else {
        NON_SYNC_SAMPLE_FLAGS
    };
    // mdat payload is a 4-byte length prefix followed by the frame
    let sample_size = 4 + frame.len();

    let mfhd = Mp4Box::new(b"mfhd", |w| {
        w.int(0, 4).int(sequence as i64, 4);
    });
    let tfhd = Mp4Box::new(b"tfhd", |w| {
        w.int(TFHD_FLAGS, 4)
            .int(TRACK_ID as i64, 4)
            .int(NON_SYNC_SAMPLE_FLAGS as i64, 4);
    });
    let tfdt = Mp4Box::new(b"tfdt", |w| {
        // version 1: 64-bit decode time
        w.int(0x0100_0000, 4).int(decode_time(sequence) as i64, 8);
    });

    // Offset from the start of moof to the first byte of mdat payload
    let data_offset = HEADER_LEN
        + mfhd.encoded_len()
        + HEADER_LEN
        + tfhd.encoded_len()
        + tfdt.encoded_len()
        + TRUN_LEN
        + HEADER_LEN;

    let trun = Mp4Box::new(b"trun", |w| {
        w.int(TRUN_FLAGS, 4)
            .int(1, 4)
            .int(data_offset as i64, 4)
            .int(sample_flags as i64, 4)
            .int(SAMPLE_DURATION as i64, 4)
            .int(sample_size as i64, 4);
    });
    debug_assert_eq!(trun.encoded_len(), TRUN_LEN);

    let moof = Mp4Box::container(
        b"moof",
        vec![mfhd, Mp4Box::container(b"traf", vec![tfhd, tfdt, trun])],
    );
    let mdat = Mp4Box::new(b"mdat", |w| {
        w.int(frame.len() as i64, 4).bytes(frame.data());
    });

    let mut buf = BytesMut::with_capacity(moof.encoded_len() + mdat.encoded_len());
    moof.write_to(&mut buf);
    mdat.write_to(&mut buf);
    buf.freeze()
}

/// Caches the initialization segment for one stream configuration
#[derive(Debug, Default)]
pub struct InitSegmentCache {
    cached: Option<(StreamConfig, Bytes)>,
}

impl InitSegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached segment for `config`, building it on first use
    /// or when the configuration changed.
    pub fn get_or_build(&mut self, config: &StreamConfig) -> Bytes {
        if let Some((key, segment)) = &self.cached {
            if key == config {
                return segment.clone();
            }
        }

        let moov = moov(config);
        let segment = encode_init(&ftyp(), &moov);
        tracing::debug!(
            width = config.width,
            height = config.height,
            codec = %config.avc.codec_string(),
            size = segment.len(),
            layout = %moov,
            "Built initialization segment"
        );
        self.cached = Some((config.clone(), segment.clone()));
        segment
    }
}

fn ftyp() -> Mp4Box {
    Mp4Box::new(b"ftyp", |w| {
        w.ascii("isom") // major brand
            .int(0x200, 4) // minor version
            .ascii("isomiso2iso5avc1mp41"); // compatible brands
    })
}

fn moov(config: &StreamConfig) -> Mp4Box {
    Mp4Box::container(b"moov", vec![mvhd(), trak(config), mvex()])
}

fn mvhd() -> Mp4Box {
    Mp4Box::new(b"mvhd", |w| {
        w.int(0, 4) // version and flags
            .int(0, 4) // creation time
            .int(0, 4) // modification time
            .int(MOVIE_TIMESCALE as i64, 4)
            .int(0, 4) // duration
            .int(0x0001_0000, 4) // rate 1.0
            .int(0x0100, 2) // volume 1.0
            .zeros(10);
        for m in UNITY_MATRIX {
            w.int(m, 4);
        }
        w.zeros(24) // pre-defined
            .int(-1, 4); // next track id
    })
}

fn trak(config: &StreamConfig) -> Mp4Box {
    Mp4Box::container(b"trak", vec![tkhd(config.width, config.height), mdia(config)])
}

fn tkhd(width: u16, height: u16) -> Mp4Box {
    Mp4Box::new(b"tkhd", |w| {
        w.int(7, 4) // version 0, enabled | in movie | in preview
            .int(0, 4) // creation time
            .int(0, 4) // modification time
            .int(TRACK_ID as i64, 4)
            .int(0, 4) // reserved
            .int(0, 4) // duration
            .zeros(8)
            .int(0, 2) // layer
            .int(0, 2) // alternate group
            .int(0, 2) // volume, unused for video
            .int(0, 2);
        for m in UNITY_MATRIX {
            w.int(m, 4);
        }
        // 16.16 fixed point
        w.int((width as i64) << 16, 4).int((height as i64) << 16, 4);
    })
}

fn mdia(config: &StreamConfig) -> Mp4Box {
    Mp4Box::container(b"mdia", vec![mdhd(), hdlr(), minf(config)])
}

fn mdhd() -> Mp4Box {
    Mp4Box::new(b"mdhd", |w| {
        w.int(0, 4)
            .int(0, 4)
            .int(0, 4)
            .int(TRACK_TIMESCALE as i64, 4)
            .int(0, 4) // duration
            .int(0x55C4, 2) // language: und
            .int(0, 2);
    })
}

fn hdlr() -> Mp4Box {
    Mp4Box::new(b"hdlr", |w| {
        w.int(0, 4)
            .int(0, 4)
            .ascii("vide")
            .zeros(12)
            .ascii(HANDLER_NAME)
            .int(0, 1);
    })
}

fn minf(config: &StreamConfig) -> Mp4Box {
    let vmhd = Mp4Box::new(b"vmhd", |w| {
        w.int(1, 4) // flags: no lean ahead
            .int(0, 2) // graphics mode
            .zeros(6); // opcolor
    });
    let dinf = Mp4Box::container(
        b"dinf",
        vec![Mp4Box::new(b"dref", |w| {
            w.int(0, 4).int(1, 4).child(b"url ", |w| {
                // self-contained
                w.int(1, 4);
            });
        })],
    );
    Mp4Box::container(b"minf", vec![vmhd, dinf, stbl(config)])
}

fn stbl(config: &StreamConfig) -> Mp4Box {
    // Samples live in fragments, so every table except stsd is empty
    let empty = |tag: &[u8; 4]| {
        Mp4Box::new(tag, |w| {
            w.int(0, 4).int(0, 4);
        })
    };
    let stsz = Mp4Box::new(b"stsz", |w| {
        w.int(0, 4).int(0, 4).int(0, 4);
    });

    Mp4Box::container(
        b"stbl",
        vec![stsd(config), empty(b"stts"), empty(b"stsc"), stsz, empty(b"stco")],
    )
}

fn stsd(config: &StreamConfig) -> Mp4Box {
    let avcc = Mp4Box::raw(b"avcC", config.avc.decoder_config_record());

    Mp4Box::new(b"stsd", |w| {
        w.int(0, 4).int(1, 4).child(b"avc1", |w| {
            w.zeros(6) // reserved
                .int(1, 2) // data reference index
                .int(0, 2)
                .int(0, 2)
                .zeros(12)
                .int(config.width as i64, 2)
                .int(config.height as i64, 2)
                .int(0x0048_0000, 4) // 72 dpi
                .int(0x0048_0000, 4)
                .int(0, 4) // data size
                .int(1, 2) // frame count
                .zeros(32) // compressor name
                .int(0x18, 2) // depth
                .int(-1, 2)
                .boxed(&avcc);
        });
    })
}

fn mvex() -> Mp4Box {
    Mp4Box::container(
        b"mvex",
        vec![
            Mp4Box::new(b"mehd", |w| {
                w.int(0, 4).int(0, 4);
            }),
            Mp4Box::new(b"trex", |w| {
                w.int(0, 4)
                    .int(TRACK_ID as i64, 4)
                    .int(1, 4) // sample description index
                    .int(0, 4) // duration
                    .int(0, 4) // size
                    .int(0x0001_0000, 4); // flags
            }),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::bmff::{BoxBody, BoxIter};

    const SPS: &[u8] = &[
        0x27, 0x64, 0x00, 0x28, 0xac, 0x2b, 0x40, 0x28, 0x02, 0xdd, 0x00, 0xf1, 0x22, 0x6a,
    ];
    const PPS: &[u8] = &[0x28, 0xee, 0x02, 0x5c, 0xb0, 0x00];

    fn config(width: u16, height: u16) -> StreamConfig {
        let avc = AvcConfig::from_parameter_sets(
            vec![Bytes::from_static(SPS)],
            vec![Bytes::from_static(PPS)],
        )
        .unwrap();
        StreamConfig::new(width, height, avc)
    }

    fn frame(bytes: &'static [u8]) -> CodedFrame {
        CodedFrame::new(Bytes::from_static(bytes)).unwrap()
    }

    fn top_level_tags(data: &[u8]) -> Vec<[u8; 4]> {
        BoxIter::new(data).map(|r| r.unwrap().0).collect()
    }

    fn raw_payload(b: &Mp4Box) -> &Bytes {
        match b.body() {
            BoxBody::Raw(payload) => payload,
            BoxBody::Children(_) => panic!("expected leaf box"),
        }
    }

    fn be32(data: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    #[test]
    fn test_timing_constants_are_consistent() {
        let nanos = SAMPLE_DURATION as u64 * 1_000_000_000 / TRACK_TIMESCALE as u64;
        assert_eq!(SAMPLE_DURATION as u64 * 1_000_000_000 % TRACK_TIMESCALE as u64, 0);
        assert_eq!(Duration::from_nanos(nanos), NOMINAL_FRAME_INTERVAL);
    }

    #[test]
    fn test_init_segment_is_ftyp_then_moov() {
        let init = build_init_segment(&config(1280, 720));
        assert_eq!(top_level_tags(&init), vec![*b"ftyp", *b"moov"]);
        assert!(!init.windows(4).any(|w| w == b"moof" || w == b"mdat"));
    }

    #[test]
    fn test_init_segment_tree() {
        let init = build_init_segment(&config(1280, 720));
        let boxes = Mp4Box::decode(&init).unwrap();
        let moov = &boxes[1];

        let tags: Vec<&[u8; 4]> = moov.children().iter().map(Mp4Box::tag).collect();
        assert_eq!(tags, vec![b"mvhd", b"trak", b"mvex"]);
        assert!(moov.find(&[b"trak", b"mdia", b"minf", b"stbl", b"stsd"]).is_some());
        assert!(moov.find(&[b"mvex", b"trex"]).is_some());

        // Decoding and re-encoding reproduces the same bytes
        let mut reencoded = BytesMut::new();
        boxes.iter().for_each(|b| b.write_to(&mut reencoded));
        assert_eq!(&reencoded[..], &init[..]);
    }

    #[test]
    fn test_ftyp_brands() {
        let bytes = ftyp().to_bytes();
        assert_eq!(bytes.len(), 8 + 4 + 4 + 20);
        assert_eq!(&bytes[8..12], b"isom");
        assert_eq!(be32(&bytes, 12), 0x200);
        assert_eq!(&bytes[16..], b"isomiso2iso5avc1mp41");
    }

    #[test]
    fn test_tkhd_golden_1280x720() {
        #[rustfmt::skip]
        let expected: [u8; 92] = [
            0x00, 0x00, 0x00, 0x5C, b't', b'k', b'h', b'd',
            0x00, 0x00, 0x00, 0x07, // version 0, flags 7
            0x00, 0x00, 0x00, 0x00, // creation time
            0x00, 0x00, 0x00, 0x00, // modification time
            0x00, 0x00, 0x00, 0x01, // track id
            0x00, 0x00, 0x00, 0x00, // reserved
            0x00, 0x00, 0x00, 0x00, // duration
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // reserved
            0x00, 0x00, 0x00, 0x00, // layer, alternate group
            0x00, 0x00, 0x00, 0x00, // volume, reserved
            0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00,
            0x05, 0x00, 0x00, 0x00, // width 1280 << 16
            0x02, 0xD0, 0x00, 0x00, // height 720 << 16
        ];

        let init = build_init_segment(&config(1280, 720));
        let boxes = Mp4Box::decode(&init).unwrap();
        let tkhd = boxes[1].find(&[b"trak", b"tkhd"]).unwrap();

        assert_eq!(&tkhd.to_bytes()[..], &expected[..]);
        assert_eq!(be32(&expected, 84), 1280 << 16);
        assert_eq!(be32(&expected, 88), 720 << 16);
    }

    #[test]
    fn test_timescales_in_init_segment() {
        let init = build_init_segment(&config(640, 480));
        let boxes = Mp4Box::decode(&init).unwrap();

        let mvhd = raw_payload(boxes[1].find(&[b"mvhd"]).unwrap());
        assert_eq!(be32(mvhd, 12), MOVIE_TIMESCALE);
        // next track id uses the all-ones sentinel
        assert_eq!(be32(mvhd, mvhd.len() - 4), 0xFFFF_FFFF);

        let mdhd = raw_payload(boxes[1].find(&[b"trak", b"mdia", b"mdhd"]).unwrap());
        assert_eq!(be32(mdhd, 12), TRACK_TIMESCALE);
    }

    #[test]
    fn test_sample_entry_carries_dimensions_and_avcc() {
        let cfg = config(1280, 720);
        let init = build_init_segment(&cfg);
        let boxes = Mp4Box::decode(&init).unwrap();
        let stsd = raw_payload(
            boxes[1]
                .find(&[b"trak", b"mdia", b"minf", b"stbl", b"stsd"])
                .unwrap(),
        );

        // version/flags + entry count, then the avc1 entry
        assert_eq!(be32(stsd, 4), 1);
        let (tag, avc1) = BoxIter::new(&stsd[8..]).next().unwrap().unwrap();
        assert_eq!(&tag, b"avc1");
        assert_eq!(u16::from_be_bytes([avc1[24], avc1[25]]), 1280);
        assert_eq!(u16::from_be_bytes([avc1[26], avc1[27]]), 720);

        let (tag, avcc) = BoxIter::new(&avc1[78..]).next().unwrap().unwrap();
        assert_eq!(&tag, b"avcC");
        assert_eq!(avcc, &cfg.avc.decoder_config_record()[..]);
    }

    #[test]
    fn test_init_segment_is_deterministic() {
        let a = build_init_segment(&config(1280, 720));
        let b = build_init_segment(&config(1280, 720));
        assert_eq!(a, b);
        assert_ne!(a, build_init_segment(&config(1920, 1080)));
    }

    #[test]
    fn test_media_segment_golden_keyframe() {
        let segment = build_media_segment(1, &frame(&[0x65, 0xAA]), true);

        #[rustfmt::skip]
        let parts: &[&[u8]] = &[
            &[0x00, 0x00, 0x00, 0x68], b"moof",
            &[0x00, 0x00, 0x00, 0x10], b"mfhd",
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01],
            &[0x00, 0x00, 0x00, 0x50], b"traf",
            &[0x00, 0x00, 0x00, 0x14], b"tfhd",
            &[0x00, 0x02, 0x00, 0x20, 0x00, 0x00, 0x00, 0x01, 0x01, 0x01, 0x00, 0x00],
            &[0x00, 0x00, 0x00, 0x14], b"tfdt",
            &[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x4A],
            &[0x00, 0x00, 0x00, 0x20], b"trun",
            &[0x00, 0x00, 0x03, 0x05], // flags
            &[0x00, 0x00, 0x00, 0x01], // sample count
            &[0x00, 0x00, 0x00, 0x70], // data offset
            &[0x02, 0x00, 0x00, 0x00], // sync sample
            &[0x00, 0x00, 0x01, 0x4A], // duration 330
            &[0x00, 0x00, 0x00, 0x06], // size
            &[0x00, 0x00, 0x00, 0x0E], b"mdat",
            &[0x00, 0x00, 0x00, 0x02, 0x65, 0xAA],
        ];
        let expected = parts.concat();

        assert_eq!(&segment[..], &expected[..]);
    }

    #[test]
    fn test_media_segment_non_sync_flags() {
        let segment = build_media_segment(4, &frame(&[0x41, 0x01, 0x02]), false);
        let boxes = Mp4Box::decode(&segment).unwrap();
        let trun = raw_payload(boxes[0].find(&[b"traf", b"trun"]).unwrap());

        assert_eq!(be32(trun, 12), NON_SYNC_SAMPLE_FLAGS);
    }

    #[test]
    fn test_media_segment_structure() {
        let data: &'static [u8] = &[0x41, 0x9A, 0x00, 0x10, 0x20, 0x30, 0x40];
        let segment = build_media_segment(7, &frame(data), false);

        assert_eq!(top_level_tags(&segment), vec![*b"moof", *b"mdat"]);

        let boxes = Mp4Box::decode(&segment).unwrap();
        let mdat = raw_payload(&boxes[1]);
        assert_eq!(be32(mdat, 0) as usize, data.len());
        assert_eq!(&mdat[4..], data);

        // data offset lands on the first byte of the mdat payload
        let trun = raw_payload(boxes[0].find(&[b"traf", b"trun"]).unwrap());
        let offset = be32(trun, 8) as usize;
        assert_eq!(offset, boxes[0].encoded_len() + HEADER_LEN);
        assert_eq!(&segment[offset + 4..], data);
        assert_eq!(be32(trun, 20) as usize, 4 + data.len());
    }

    #[test]
    fn test_sequence_and_decode_time() {
        for k in [1u32, 2, 3, 100, 1_000_000] {
            let segment = build_media_segment(k, &frame(&[0x41, 0x00]), false);
            let boxes = Mp4Box::decode(&segment).unwrap();

            let mfhd = raw_payload(boxes[0].find(&[b"mfhd"]).unwrap());
            assert_eq!(be32(mfhd, 4), k);

            let tfdt = raw_payload(boxes[0].find(&[b"traf", b"tfdt"]).unwrap());
            let time = u64::from_be_bytes(tfdt[4..12].try_into().unwrap());
            assert_eq!(time, k as u64 * SAMPLE_DURATION as u64);
            assert_eq!(time, decode_time(k));
        }
    }

    #[test]
    fn test_init_cache_reuses_segment() {
        let mut cache = InitSegmentCache::new();
        let cfg = config(1280, 720);

        let first = cache.get_or_build(&cfg);
        let second = cache.get_or_build(&cfg);
        // Same allocation, not just equal bytes
        assert_eq!(first.as_ptr(), second.as_ptr());

        assert_eq!(first, build_init_segment(&cfg));

        let other = cache.get_or_build(&config(640, 360));
        assert_ne!(first, other);
    }
}
