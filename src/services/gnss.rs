//! GNSS engine control.

use core::convert::TryInto;

use embedded_hal_nb::serial;
use embedded_time::duration::{Generic, Milliseconds};
use embedded_time::Clock;

use crate::client::Bg96Client;
use crate::command::gnss::{
    GetPosition, GnssNmeaSrc, GnssOutPort, QueryGnss, StartGnss, StopGnss,
};
use crate::error::Error;
use crate::socket::{SocketEvent, SocketHandle};

pub use crate::command::gnss::GnssFix;

/// GNSS access. Borrow it from a client on demand.
pub struct Gnss<'a, W, CLK, C, const N: usize, const L: usize> {
    client: &'a Bg96Client<W, CLK, C, N, L>,
}

impl<'a, W, CLK, C, const N: usize, const L: usize> Gnss<'a, W, CLK, C, N, L>
where
    W: serial::Read<u8> + serial::Write<u8>,
    CLK: Clock,
    Generic<CLK::T>: TryInto<Milliseconds>,
    C: FnMut(SocketHandle, SocketEvent),
{
    pub fn new(client: &'a Bg96Client<W, CLK, C, N, L>) -> Self {
        Gnss { client }
    }

    /// Route NMEA output away from the command port and allow fixes to be
    /// queried over it.
    pub fn configure(&self) -> Result<(), Error> {
        self.client.send_at(&GnssOutPort { port: "usbnmea" })?;
        self.client.send_at(&GnssNmeaSrc { enabled: true })?;
        Ok(())
    }

    pub fn start(&self) -> Result<(), Error> {
        self.client.send_at(&StartGnss)?;
        Ok(())
    }

    pub fn stop(&self) -> Result<(), Error> {
        self.client.send_at(&StopGnss)?;
        Ok(())
    }

    pub fn is_on(&self) -> Result<bool, Error> {
        Ok(self.client.send_at(&QueryGnss)? == 1)
    }

    /// Fetch the current fix. While the engine has none the module reports
    /// a device error (`+CME ERROR: 516`); poll until a fix appears or the
    /// application's own deadline expires.
    pub fn location(&self) -> Result<GnssFix, Error> {
        self.client.send_at(&GetPosition)
    }
}
