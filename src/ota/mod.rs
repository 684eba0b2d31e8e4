//! Firmware source side of a Z-Wave over-the-air update.
//!
//! The node drives the transfer: after the update request it asks for runs of
//! chunks with Firmware Update Get, and the session answers each run with
//! update reports until the report flagged as last has gone out. A request
//! window that elapses with nothing usable abandons the transfer.

use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::time::{sleep, timeout_at, Instant};

use crate::error::{Error, Result};
use crate::protocols::zip::{self, ChunkDescriptor, MAX_REPORT_NUMBER};
use crate::protocols::DatagramLink;

mod config;
mod link;
mod types;

pub use config::*;
pub use link::{node_address, UdpLink};
pub use types::*;

const RECV_BUFFER_SIZE: usize = 1024;

// Sequence numbers used by the controller for each message of the exchange.
const REQUEST_SEQUENCE: u8 = 1;
const MD_GET_SEQUENCE: u8 = 10;
const VERSION_GET_SEQUENCE: u8 = 11;

fn sequence_for(n: u32) -> u8 {
    (n.wrapping_add(2) % 256) as u8
}

pub struct ChunkTransferSession<L> {
    link: L,
    image: FirmwareImage,
    config: OtaConfig,
    total_chunks: u32,
    chunks_sent: usize,
    buffer: Vec<u8>,
}

impl<L: DatagramLink> ChunkTransferSession<L> {
    pub fn new(link: L, image: FirmwareImage, config: OtaConfig) -> Result<Self> {
        config.validate()?;

        let chunks = image.total_chunks();
        if chunks > MAX_REPORT_NUMBER as usize {
            return Err(Error::FirmwareTooLarge { chunks });
        }

        Ok(Self {
            link,
            image,
            config,
            total_chunks: chunks as u32,
            chunks_sent: 0,
            buffer: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    pub fn total_chunk_count(&self) -> usize {
        self.total_chunks as usize
    }

    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Announces the update, waits for acceptance per the [`AckPolicy`], serves
    /// chunks and optionally activates the new image.
    pub async fn run(&mut self) -> Result<TransferOutcome> {
        info!(
            "Starting firmware transfer: {} bytes, {} chunks, checksum {:#06x}",
            self.image.len(),
            self.total_chunks,
            self.image.checksum()
        );

        self.request_update().await?;
        self.await_acceptance().await?;

        let outcome = self.transfer().await?;
        match outcome {
            TransferOutcome::Completed { reports_sent } => {
                info!("Firmware transfer completed after {} reports", reports_sent);
                if self.config.activate {
                    self.activate().await?;
                }
            }
            TransferOutcome::Abandoned { reports_sent } => {
                warn!(
                    "No chunk request within {:?}; abandoning transfer after {} reports",
                    self.config.request_timeout, reports_sent
                );
            }
        }
        Ok(outcome)
    }

    pub async fn request_update(&mut self) -> Result<()> {
        let payload = zip::encode_firmware_update_request_get(
            self.config.vendor_id,
            self.config.firmware_id,
            self.image.checksum(),
            self.config.firmware_target,
        )?;
        debug!("Sending Firmware Update Request Get");
        self.send(&payload, REQUEST_SEQUENCE).await
    }

    async fn await_acceptance(&mut self) -> Result<()> {
        match self.config.ack_policy {
            AckPolicy::Assume => {
                debug!("Not waiting for a Request Report; assuming the node accepted");
                Ok(())
            }
            AckPolicy::Require => {
                let deadline = Instant::now() + self.config.ack_timeout;
                loop {
                    let len = match timeout_at(deadline, self.link.recv(&mut self.buffer)).await {
                        Ok(received) => received?,
                        Err(_) => return Err(Error::AckTimeout),
                    };
                    if zip::is_request_report(&self.buffer[..len]) {
                        info!("Node accepted the firmware update request");
                        return Ok(());
                    }
                    trace!("Discarding {} byte datagram while waiting for acknowledgment", len);
                }
            }
        }
    }

    /// Alternates waiting and delivering until the last report is sent or a
    /// request window elapses.
    pub async fn transfer(&mut self) -> Result<TransferOutcome> {
        loop {
            let request = self.await_chunk_request(self.config.request_timeout).await?;
            if request.is_sentinel() {
                return Ok(TransferOutcome::Abandoned {
                    reports_sent: self.chunks_sent,
                });
            }

            if self.deliver(request).await? {
                return Ok(TransferOutcome::Completed {
                    reports_sent: self.chunks_sent,
                });
            }
        }
    }

    /// Waits at most `timeout` in total for a chunk request. Datagrams that
    /// are not chunk requests are dropped without extending the window.
    pub async fn await_chunk_request(&mut self, timeout: Duration) -> Result<ChunkDescriptor> {
        let deadline = Instant::now() + timeout;
        loop {
            let len = match timeout_at(deadline, self.link.recv(&mut self.buffer)).await {
                Ok(received) => received?,
                Err(_) => return Ok(ChunkDescriptor::SENTINEL),
            };

            match zip::decode_chunk_request(&self.buffer[..len]) {
                Some(request) => {
                    debug!("Chunk request: {} chunks from #{}", request.size, request.index);
                    return Ok(request);
                }
                None => trace!("Ignoring {} byte datagram, not a chunk request", len),
            }
        }
    }

    /// Sends the requested run of reports. Returns true once the report
    /// flagged as last has been sent, which also ends the run early.
    pub async fn deliver(&mut self, request: ChunkDescriptor) -> Result<bool> {
        for number in request.chunk_numbers() {
            let last = number >= self.total_chunks;
            // Report numbers are 15 bits on the wire.
            let report_number = (number & MAX_REPORT_NUMBER) as u16;
            let report =
                zip::encode_firmware_update_report(report_number, last, self.image.chunk(number))?;

            self.send(&report, sequence_for(number)).await?;
            self.chunks_sent += 1;
            debug!("Sent chunk {}/{}", number, self.total_chunks);

            if !self.config.report_interval.is_zero() {
                sleep(self.config.report_interval).await;
            }

            if last {
                debug!("Last chunk sent");
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn activate(&mut self) -> Result<()> {
        let payload = zip::encode_firmware_active_set(
            self.config.vendor_id,
            self.config.firmware_id,
            self.image.checksum(),
            self.config.firmware_target,
            self.config.hw_version,
        )?;
        info!("Sending Firmware Update Activation Set");
        self.send(&payload, sequence_for(self.total_chunks)).await
    }

    async fn send(&mut self, payload: &[u8], sequence_no: u8) -> Result<()> {
        let envelope = zip::encode_envelope(payload, sequence_no, self.config.flags())?;
        self.link.send(&envelope).await?;
        Ok(())
    }
}

/// Asks the node for its firmware metadata. The reply is not awaited.
pub async fn send_md_get<L: DatagramLink>(link: &mut L, config: &OtaConfig) -> Result<()> {
    let envelope = zip::encode_envelope(&zip::encode_firmware_md_get()?, MD_GET_SEQUENCE, config.flags())?;
    info!("Sending Firmware MD Get");
    link.send(&envelope).await?;
    Ok(())
}

/// Asks the node for its application version. The reply is not awaited.
pub async fn send_version_get<L: DatagramLink>(link: &mut L, config: &OtaConfig) -> Result<()> {
    let envelope = zip::encode_envelope(&zip::encode_version_get()?, VERSION_GET_SEQUENCE, config.flags())?;
    info!("Sending Version Get");
    link.send(&envelope).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;

    use tokio::sync::mpsc;

    use super::*;
    use crate::checksum;
    use crate::protocols::zip::{decode_envelope, CHECKSUM_LEN};

    /// In-memory link: inbound datagrams come from a channel, outbound ones
    /// are collected.
    struct ChannelLink {
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl DatagramLink for ChannelLink {
        async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
            self.sent.push(datagram.to_vec());
            Ok(())
        }

        async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.inbound.recv().await {
                Some(datagram) => {
                    buf[..datagram.len()].copy_from_slice(&datagram);
                    Ok(datagram.len())
                }
                // Nothing more will arrive; behave like a silent network.
                None => std::future::pending().await,
            }
        }
    }

    fn link() -> (ChannelLink, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ChannelLink {
                inbound: rx,
                sent: Vec::new(),
            },
            tx,
        )
    }

    fn chunk_get(index: u16, size: u8) -> Vec<u8> {
        let [hi, lo] = index.to_be_bytes();
        vec![0x23, 0x02, 0x00, 0xC0, 0x01, 0x00, 0x00, 0x7A, 0x05, size, hi, lo]
    }

    fn config() -> OtaConfig {
        OtaConfig::new()
            .with_node(3)
            .with_report_interval(Duration::ZERO)
            .with_request_timeout(Duration::from_secs(30))
    }

    fn image(len: usize) -> FirmwareImage {
        FirmwareImage::new((0..len).map(|i| i as u8).collect::<Vec<_>>())
    }

    struct Report {
        sequence_no: u8,
        number: u16,
        last: bool,
        data: Vec<u8>,
    }

    fn parse_report(datagram: &[u8]) -> Report {
        let env = decode_envelope(datagram).unwrap();
        let payload = &env.payload[..];
        assert_eq!(&payload[..2], &[0x7A, 0x06]);

        let (body, crc) = payload.split_at(payload.len() - CHECKSUM_LEN);
        assert_eq!(u16::from_be_bytes([crc[0], crc[1]]), checksum::compute(body));

        let header = u16::from_be_bytes([payload[2], payload[3]]);
        Report {
            sequence_no: env.sequence_no,
            number: header & 0x7FFF,
            last: header & 0x8000 != 0,
            data: body[4..].to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hundred_bytes_in_one_request() {
        let (link, tx) = link();
        let mut session = ChunkTransferSession::new(link, image(100), config()).unwrap();
        assert_eq!(session.total_chunk_count(), 3);

        tx.send(chunk_get(1, 3)).unwrap();
        let outcome = session.transfer().await.unwrap();
        assert_eq!(outcome, TransferOutcome::Completed { reports_sent: 3 });

        let link = session.into_link();
        let reports: Vec<_> = link.sent.iter().map(|d| parse_report(d)).collect();
        assert_eq!(reports.iter().map(|r| r.number).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(reports.iter().map(|r| r.last).collect::<Vec<_>>(), vec![false, false, true]);
        assert_eq!(reports.iter().map(|r| r.sequence_no).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(reports[2].data.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_last_chunk_even_if_more_requested() {
        let (link, tx) = link();
        let mut session = ChunkTransferSession::new(link, image(81), config()).unwrap();

        tx.send(chunk_get(2, 10)).unwrap();
        assert!(session.deliver(ChunkDescriptor::new(1, 1)).await.is_ok());
        let outcome = session.transfer().await.unwrap();
        assert_eq!(outcome, TransferOutcome::Completed { reports_sent: 3 });

        let reports: Vec<_> = session.into_link().sent.iter().map(|d| parse_report(d)).collect();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports.iter().filter(|r| r.last).count(), 1);
        assert_eq!(reports[2].number, 3);
        assert_eq!(reports[2].data, vec![80]);
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_last_report_across_requests() {
        for len in [1usize, 39, 40, 41, 200, 1234] {
            let (link, tx) = link();
            let mut session = ChunkTransferSession::new(link, image(len), config()).unwrap();
            let total = session.total_chunk_count();
            assert_eq!(total, len.div_ceil(40));

            let mut index = 1u16;
            while (index as usize) <= total {
                tx.send(chunk_get(index, 2)).unwrap();
                index += 2;
            }
            assert!(session.transfer().await.unwrap().is_completed());

            let reports: Vec<_> = session.into_link().sent.iter().map(|d| parse_report(d)).collect();
            let last: Vec<_> = reports.iter().filter(|r| r.last).collect();
            assert_eq!(last.len(), 1, "image of {len} bytes");
            assert_eq!(last[0].number as usize, total);
            assert_eq!(reports.iter().flat_map(|r| r.data.clone()).count(), len);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_sentinel() {
        let (link, _tx) = link();
        let mut session = ChunkTransferSession::new(link, image(100), config()).unwrap();

        let start = Instant::now();
        let request = session.await_chunk_request(Duration::from_secs(30)).await.unwrap();
        assert_eq!(request, ChunkDescriptor::SENTINEL);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn noise_does_not_extend_window() {
        let (link, tx) = link();
        let mut session = ChunkTransferSession::new(link, image(100), config()).unwrap();

        let start = Instant::now();
        let noise = tokio::spawn(async move {
            for _ in 0..5 {
                sleep(Duration::from_secs(10)).await;
                // Version report, not a chunk request.
                if tx.send(vec![0x23, 0x02, 0x40, 0x50, 0x01, 0x00, 0x00, 0x86, 0x12]).is_err() {
                    break;
                }
            }
        });

        let request = session.await_chunk_request(Duration::from_secs(30)).await.unwrap();
        assert!(request.is_sentinel());
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
        noise.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn run_abandons_without_retry() {
        let (link, tx) = link();
        let mut session = ChunkTransferSession::new(link, image(100), config()).unwrap();

        tx.send(chunk_get(1, 1)).unwrap();
        let outcome = session.run().await.unwrap();
        assert_eq!(outcome, TransferOutcome::Abandoned { reports_sent: 1 });

        let sent = session.into_link().sent;
        assert_eq!(sent.len(), 2);
        let request = decode_envelope(&sent[0]).unwrap();
        assert_eq!(request.sequence_no, 1);
        assert_eq!(&request.payload[..2], &[0x7A, 0x03]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_size_request_ends_transfer() {
        let (link, tx) = link();
        let mut session = ChunkTransferSession::new(link, image(100), config()).unwrap();

        tx.send(chunk_get(4, 0)).unwrap();
        let outcome = session.transfer().await.unwrap();
        assert_eq!(outcome, TransferOutcome::Abandoned { reports_sent: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn required_ack_times_out() {
        let (link, _tx) = link();
        let config = config().with_ack_policy(AckPolicy::Require);
        let mut session = ChunkTransferSession::new(link, image(100), config).unwrap();
        assert!(matches!(session.run().await, Err(Error::AckTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn required_ack_then_activation() {
        let (link, tx) = link();
        let config = config().with_ack_policy(AckPolicy::Require).activate();
        let mut session = ChunkTransferSession::new(link, image(100), config).unwrap();

        tx.send(vec![0x23, 0x02, 0x40, 0x50, 0x01, 0x00, 0x00, 0x7A, 0x05, 0x01, 0x00, 0x01])
            .unwrap();
        tx.send(vec![0x23, 0x02, 0x40, 0x50, 0x01, 0x00, 0x00, 0x7A, 0x04, 0xFF]).unwrap();
        tx.send(chunk_get(1, 3)).unwrap();

        assert!(session.run().await.unwrap().is_completed());

        // The chunk request that arrived before acceptance was consumed while
        // waiting for it, so only the second request is served.
        let sent = session.into_link().sent;
        assert_eq!(sent.len(), 5);
        let activation = decode_envelope(&sent[4]).unwrap();
        assert_eq!(&activation.payload[..2], &[0x7A, 0x08]);
        assert_eq!(activation.sequence_no, 5);
    }

    #[test]
    fn rejects_oversized_image() {
        let (link, _tx) = link();
        let image = FirmwareImage::new(vec![0u8; 0x8000 * 40]);
        assert!(matches!(
            ChunkTransferSession::new(link, image, config()),
            Err(Error::FirmwareTooLarge { chunks: 0x8000 })
        ));
    }

    #[tokio::test]
    async fn one_shot_queries() {
        let (mut link, _tx) = link();
        send_md_get(&mut link, &config()).await.unwrap();
        send_version_get(&mut link, &config()).await.unwrap();
        assert_eq!(
            link.sent,
            vec![
                vec![0x23, 0x02, 0x00, 0x50, 10, 0, 0, 0x7A, 0x01],
                vec![0x23, 0x02, 0x00, 0x50, 11, 0, 0, 0x86, 0x11],
            ]
        );
    }
}
