//! `embedded-nal` socket stack implementations, thin shims over the
//! engine's socket operations.

use core::convert::TryInto;

use embedded_hal_nb::serial;
use embedded_nal::SocketAddr;
use embedded_time::duration::{Generic, Milliseconds};
use embedded_time::Clock;

#[cfg(feature = "socket-tcp")]
use embedded_nal::TcpClientStack;
#[cfg(feature = "socket-udp")]
use embedded_nal::{UdpClientStack, UdpFullStack};

use crate::client::Bg96Client;
use crate::error::Error;
use crate::socket::{Protocol, SocketEvent, SocketHandle};

#[cfg(feature = "socket-tcp")]
impl<W, CLK, C, const N: usize, const L: usize> TcpClientStack for Bg96Client<W, CLK, C, N, L>
where
    W: serial::Read<u8> + serial::Write<u8>,
    CLK: Clock,
    Generic<CLK::T>: TryInto<Milliseconds>,
    C: FnMut(SocketHandle, SocketEvent),
{
    type Error = Error;

    // Only a handle into the registry owned by the client; the socket
    // state itself has no value outside the engine.
    type TcpSocket = SocketHandle;

    fn socket(&mut self) -> Result<Self::TcpSocket, Self::Error> {
        self.socket_open(Protocol::Tcp)
    }

    fn connect(
        &mut self,
        socket: &mut Self::TcpSocket,
        remote: SocketAddr,
    ) -> nb::Result<(), Self::Error> {
        self.socket_connect(*socket, remote).map_err(nb::Error::Other)
    }

    fn is_connected(&mut self, socket: &Self::TcpSocket) -> Result<bool, Self::Error> {
        self.socket_is_connected(*socket)
    }

    fn send(
        &mut self,
        socket: &mut Self::TcpSocket,
        buffer: &[u8],
    ) -> nb::Result<usize, Self::Error> {
        self.socket_send(*socket, buffer)
    }

    fn receive(
        &mut self,
        socket: &mut Self::TcpSocket,
        buffer: &mut [u8],
    ) -> nb::Result<usize, Self::Error> {
        self.socket_recv(*socket, buffer)
    }

    fn close(&mut self, socket: Self::TcpSocket) -> Result<(), Self::Error> {
        self.socket_close(socket)
    }
}

#[cfg(feature = "socket-udp")]
impl<W, CLK, C, const N: usize, const L: usize> UdpClientStack for Bg96Client<W, CLK, C, N, L>
where
    W: serial::Read<u8> + serial::Write<u8>,
    CLK: Clock,
    Generic<CLK::T>: TryInto<Milliseconds>,
    C: FnMut(SocketHandle, SocketEvent),
{
    type Error = Error;

    type UdpSocket = SocketHandle;

    fn socket(&mut self) -> Result<Self::UdpSocket, Self::Error> {
        self.socket_open(Protocol::Udp)
    }

    fn connect(
        &mut self,
        socket: &mut Self::UdpSocket,
        remote: SocketAddr,
    ) -> Result<(), Self::Error> {
        self.socket_connect(*socket, remote)
    }

    fn send(
        &mut self,
        socket: &mut Self::UdpSocket,
        buffer: &[u8],
    ) -> nb::Result<(), Self::Error> {
        let sent = self.socket_send(*socket, buffer)?;
        if sent < buffer.len() {
            // Datagrams go out whole or not at all.
            return Err(nb::Error::Other(Error::BadLength));
        }
        Ok(())
    }

    fn receive(
        &mut self,
        socket: &mut Self::UdpSocket,
        buffer: &mut [u8],
    ) -> nb::Result<(usize, SocketAddr), Self::Error> {
        let count = self.socket_recv(*socket, buffer)?;
        let remote = self.socket_endpoint(*socket).map_err(nb::Error::Other)?;
        Ok((count, remote))
    }

    fn close(&mut self, socket: Self::UdpSocket) -> Result<(), Self::Error> {
        self.socket_close(socket)
    }
}

#[cfg(feature = "socket-udp")]
impl<W, CLK, C, const N: usize, const L: usize> UdpFullStack for Bg96Client<W, CLK, C, N, L>
where
    W: serial::Read<u8> + serial::Write<u8>,
    CLK: Clock,
    Generic<CLK::T>: TryInto<Milliseconds>,
    C: FnMut(SocketHandle, SocketEvent),
{
    /// The module has no native bind; a bound socket is modeled as a
    /// listening one, polling for inbound data with the read timeout
    /// disabled.
    fn bind(&mut self, socket: &mut Self::UdpSocket, _local_port: u16) -> Result<(), Self::Error> {
        self.socket_listen(*socket)
    }

    fn send_to(
        &mut self,
        socket: &mut Self::UdpSocket,
        remote: SocketAddr,
        buffer: &[u8],
    ) -> nb::Result<(), Self::Error> {
        if !self.socket_is_connected(*socket).map_err(nb::Error::Other)? {
            self.socket_connect(*socket, remote).map_err(nb::Error::Other)?;
        }
        UdpClientStack::send(self, socket, buffer)
    }
}
