pub mod layout;
pub mod relay;
pub mod zip;

use std::io;

/// Unreliable, unordered message transport carrying one envelope per datagram.
pub trait DatagramLink {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Waits for the next datagram and returns its length.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
