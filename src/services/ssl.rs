//! TLS sockets. These use their own module-side client ids and bypass the
//! plain socket engine entirely; every operation is a direct exchange.

use core::convert::TryInto;

use embedded_hal_nb::serial;
use embedded_time::duration::{Generic, Milliseconds};
use embedded_time::Clock;

use crate::client::{Bg96Client, INGRESS_CHUNK_SIZE};
use crate::command::ssl::{
    SslClose, SslConfigCertPath, SslConfigIgnoreLocalTime, SslConfigNegotiateTime,
    SslConfigSecLevel, SslConfigVersion, SslOpen, SslReadData, SslSendData, SslState,
};
use crate::error::Error;
use crate::services::file::FileStore;
use crate::socket::{SocketEvent, SocketHandle};

/// All TLS versions accepted, the module default.
pub const SSL_VERSION_ALL: u8 = 4;

const CA_CERT_NAME: &str = "cacert.pem";
const CLIENT_CERT_NAME: &str = "clientcert.pem";
const CLIENT_KEY_NAME: &str = "clientkey.pem";

/// One TLS connection slot: an SSL context plus a module-side client id.
pub struct TlsSocket<'a, W, CLK, C, const N: usize, const L: usize> {
    client: &'a Bg96Client<W, CLK, C, N, L>,
    ssl_ctx: u8,
    client_id: u8,
    connected: bool,
}

impl<'a, W, CLK, C, const N: usize, const L: usize> TlsSocket<'a, W, CLK, C, N, L>
where
    W: serial::Read<u8> + serial::Write<u8>,
    CLK: Clock,
    Generic<CLK::T>: TryInto<Milliseconds>,
    C: FnMut(SocketHandle, SocketEvent),
{
    pub fn new(client: &'a Bg96Client<W, CLK, C, N, L>, ssl_ctx: u8, client_id: u8) -> Self {
        TlsSocket {
            client,
            ssl_ctx,
            client_id,
            connected: false,
        }
    }

    /// Upload the CA certificate to module storage and point the context at
    /// it. Enables server authentication (security level 1).
    pub fn set_root_ca(&self, ca_pem: &str) -> Result<(), Error> {
        FileStore::new(self.client).upload_replacing(CA_CERT_NAME, ca_pem.as_bytes())?;
        self.client.send_at(&SslConfigCertPath {
            kind: "cacert",
            ssl_ctx: self.ssl_ctx,
            path: CA_CERT_NAME,
        })?;
        self.client.send_at(&SslConfigSecLevel {
            ssl_ctx: self.ssl_ctx,
            level: 1,
        })?;
        Ok(())
    }

    /// Upload the client certificate and key. Enables mutual
    /// authentication (security level 2).
    pub fn set_client_cert_key(&self, cert_pem: &str, key_pem: &str) -> Result<(), Error> {
        let store = FileStore::new(self.client);
        store.upload_replacing(CLIENT_CERT_NAME, cert_pem.as_bytes())?;
        store.upload_replacing(CLIENT_KEY_NAME, key_pem.as_bytes())?;
        self.client.send_at(&SslConfigCertPath {
            kind: "clientcert",
            ssl_ctx: self.ssl_ctx,
            path: CLIENT_CERT_NAME,
        })?;
        self.client.send_at(&SslConfigCertPath {
            kind: "clientkey",
            ssl_ctx: self.ssl_ctx,
            path: CLIENT_KEY_NAME,
        })?;
        self.client.send_at(&SslConfigSecLevel {
            ssl_ctx: self.ssl_ctx,
            level: 2,
        })?;
        Ok(())
    }

    pub fn set_version(&self, version: u8) -> Result<(), Error> {
        self.client.send_at(&SslConfigVersion {
            ssl_ctx: self.ssl_ctx,
            version,
        })?;
        Ok(())
    }

    /// Skip certificate validity checks while the module clock is not yet
    /// synchronized.
    pub fn ignore_local_time(&self, ignore: bool) -> Result<(), Error> {
        self.client.send_at(&SslConfigIgnoreLocalTime {
            ssl_ctx: self.ssl_ctx,
            ignore,
        })?;
        Ok(())
    }

    pub fn set_negotiate_time(&self, seconds: u16) -> Result<(), Error> {
        self.client.send_at(&SslConfigNegotiateTime {
            ssl_ctx: self.ssl_ctx,
            seconds,
        })?;
        Ok(())
    }

    /// Open the secure connection. One long exchange; the result line
    /// arrives once the handshake finished.
    pub fn connect(&mut self, hostname: &str, port: u16) -> Result<(), Error> {
        self.client.send_at(&SslOpen {
            pdp: self.client.context_id(),
            ssl_ctx: self.ssl_ctx,
            client_id: self.client_id,
            hostname,
            port,
        })?;
        self.connected = true;
        info!("TLS client {} connected to {}:{}", self.client_id, hostname, port);
        Ok(())
    }

    /// Send the whole buffer through the prompt-driven payload flow.
    pub fn send(&self, data: &[u8]) -> Result<usize, Error> {
        let mut channel = self.client.channel.try_borrow_mut()?;
        channel.send_payload(
            &SslSendData {
                client_id: self.client_id,
                len: data.len(),
            },
            data,
            "SEND OK",
        )?;
        Ok(data.len())
    }

    /// Read up to `buf.len()` bytes that have arrived on the connection.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let want = buf.len().min(INGRESS_CHUNK_SIZE);
        let mut channel = self.client.channel.try_borrow_mut()?;
        channel.read_binary(
            &SslReadData {
                client_id: self.client_id,
                len: want,
            },
            "+QSSLRECV:",
            &mut buf[..want],
        )
    }

    /// Ask the module whether the connection is still up.
    pub fn is_connected(&self) -> Result<bool, Error> {
        let state = self.client.send_at(&SslState {
            client_id: self.client_id,
        })?;
        Ok(state.socket_state == 2)
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.client.send_at(&SslClose {
            client_id: self.client_id,
        })?;
        self.connected = false;
        Ok(())
    }

    pub fn local_state(&self) -> bool {
        self.connected
    }
}
