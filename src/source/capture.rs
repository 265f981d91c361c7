//! Capture source feeding the hub
//!
//! Reads an Annex B stream, pulls the stream parameters out of the first
//! SPS and PPS, then hands every following NAL unit to the hub one at a
//! time.

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::annexb::AnnexBReader;
use crate::error::{MediaError, Result, SourceError};
use crate::hub::FrameSender;
use crate::media::{AvcConfig, CodedFrame, NaluType, StreamConfig};

/// H.264 capture source over any async byte stream
pub struct AnnexBSource<R> {
    reader: AnnexBReader<R>,
    frames_sent: u64,
}

impl<R: AsyncRead + Unpin> AnnexBSource<R> {
    /// Read until one SPS and one PPS have been seen and derive the
    /// stream configuration from them.
    ///
    /// Other units before that point cannot be decoded and are dropped.
    /// Input that ends first fails with
    /// [`SourceError::MissingParameterSets`].
    pub async fn open(reader: R, width: u16, height: u16) -> Result<(StreamConfig, Self)> {
        let mut reader = AnnexBReader::new(reader);
        let mut sps: Option<Bytes> = None;
        let mut pps: Option<Bytes> = None;

        while sps.is_none() || pps.is_none() {
            let Some(unit) = reader.next_nal().await? else {
                return Err(SourceError::MissingParameterSets.into());
            };
            let Some(&header) = unit.first() else {
                continue;
            };

            match NaluType::from_byte(header) {
                Some(NaluType::Sps) if sps.is_none() => sps = Some(unit),
                Some(NaluType::Pps) if pps.is_none() => pps = Some(unit),
                other => {
                    tracing::debug!(
                        unit_type = header & 0x1F,
                        nalu = ?other,
                        "Dropped unit before parameter sets"
                    );
                }
            }
        }

        let (Some(sps), Some(pps)) = (sps, pps) else {
            return Err(SourceError::MissingParameterSets.into());
        };
        let avc = AvcConfig::from_parameter_sets(vec![sps], vec![pps])?;
        let config = StreamConfig::new(width, height, avc);

        tracing::info!(
            width = width,
            height = height,
            codec = %config.avc.codec_string(),
            "Capture source opened"
        );

        Ok((
            config,
            Self {
                reader,
                frames_sent: 0,
            },
        ))
    }

    /// Forward NAL units to the hub until the input ends.
    ///
    /// Each send waits for the hub to take the frame. Dropping the sender
    /// on return tells the hub the stream is over.
    pub async fn run(mut self, frames: FrameSender) -> Result<()> {
        while let Some(unit) = self.reader.next_nal().await? {
            let frame = match CodedFrame::new(unit) {
                Ok(frame) => frame,
                Err(MediaError::EmptyFrame) => {
                    tracing::debug!("Skipped empty unit");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipped malformed unit");
                    continue;
                }
            };

            frames.send(frame).await?;
            self.frames_sent += 1;
        }

        tracing::info!(frames = self.frames_sent, "Capture source ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hub::handle::Handoff;
    use crate::hub::HubError;
    use tokio::sync::mpsc;

    const SPS: &[u8] = &[
        0x27, 0x64, 0x00, 0x28, 0xac, 0x2b, 0x40, 0x28, 0x02, 0xdd, 0x00, 0xf1, 0x22, 0x6a,
    ];
    const PPS: &[u8] = &[0x28, 0xee, 0x02, 0x5c, 0xb0, 0x00];

    fn annexb(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
        out
    }

    #[tokio::test]
    async fn test_open_reads_parameter_sets() {
        let data = annexb(&[&[0x09, 0xf0], SPS, PPS, &[0x65, 0x88]]);
        let (config, _source) = AnnexBSource::open(&data[..], 1280, 720).await.unwrap();

        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.avc.codec_string(), "avc1.640028");
        assert_eq!(config.avc.sps[0].as_ref(), SPS);
        // Trailing zero of the PPS is indistinguishable from a 4-byte start code
        assert_eq!(config.avc.pps[0].as_ref(), &PPS[..5]);
    }

    #[tokio::test]
    async fn test_open_without_pps_fails() {
        let data = annexb(&[SPS, &[0x65, 0x88], &[0x41, 0x9a]]);
        let result = AnnexBSource::open(&data[..], 640, 480).await;

        assert!(matches!(
            result,
            Err(Error::Source(SourceError::MissingParameterSets))
        ));
    }

    #[tokio::test]
    async fn test_open_empty_input_fails() {
        let data: &[u8] = &[];
        assert!(AnnexBSource::open(data, 640, 480).await.is_err());
    }

    #[tokio::test]
    async fn test_run_forwards_units_and_skips_empty() {
        let mut data = annexb(&[SPS, PPS, &[0x65, 0x88], &[0x06, 0x05]]);
        data.extend_from_slice(&[0, 0, 1]); // empty unit
        data.extend_from_slice(&annexb(&[&[0x41, 0x9a]]));

        let (_config, source) = AnnexBSource::open(&data[..], 1280, 720).await.unwrap();

        let (tx, mut rx) = mpsc::channel::<Handoff>(1);
        let hub = tokio::spawn(async move {
            let mut headers = Vec::new();
            while let Some(Handoff { frame, accepted }) = rx.recv().await {
                headers.push(frame.header());
                accepted.send(()).unwrap();
            }
            headers
        });

        source.run(FrameSender { tx }).await.unwrap();
        assert_eq!(hub.await.unwrap(), vec![0x65, 0x06, 0x41]);
    }

    #[tokio::test]
    async fn test_run_stops_when_hub_closed() {
        let data = annexb(&[SPS, PPS, &[0x65, 0x88], &[0x41, 0x9a]]);
        let (_config, source) = AnnexBSource::open(&data[..], 1280, 720).await.unwrap();

        let (tx, rx) = mpsc::channel::<Handoff>(1);
        drop(rx);

        let result = source.run(FrameSender { tx }).await;
        assert!(matches!(result, Err(Error::Hub(HubError::Closed))));
    }
}
