//! MQTT client on top of the module's built-in implementation.

use core::convert::TryInto;

use embedded_hal_nb::serial;
use embedded_time::duration::{Generic, Milliseconds};
use embedded_time::Clock;
use heapless::{String, Vec};

use crate::client::Bg96Client;
use crate::command::mqtt::{
    MqttClose, MqttConfigKeepAlive, MqttConfigPdpCid, MqttConfigRecvMode, MqttConfigSession,
    MqttConfigSsl, MqttConfigTimeout, MqttConfigVersion, MqttConfigWill, MqttConnect,
    MqttDisconnect, MqttOpen, MqttPublish, MqttReadStored, MqttSubscribe, MqttUnsubscribe,
};
use crate::error::Error;
use crate::socket::{SocketEvent, SocketHandle};

pub use crate::command::mqtt::{ConnectResult, MqttInbound};

pub const MAX_SUBSCRIPTIONS: usize = 8;

/// Module-side receive buffer slots drained by `poll_inbound`.
const RECV_SLOTS: u8 = 5;

/// Last-will message.
#[derive(Debug, Clone)]
pub struct MqttWill<'a> {
    pub qos: u8,
    pub retain: bool,
    pub topic: &'a str,
    pub message: &'a str,
}

/// Client options, defaults matching the module's.
#[derive(Debug, Clone)]
pub struct MqttOptions<'a> {
    /// 3 = MQTT 3.1, 4 = MQTT 3.1.1.
    pub version: u8,
    pub keepalive_secs: u16,
    /// Packet delivery timeout in seconds.
    pub pkt_timeout: u8,
    pub retries: u8,
    pub timeout_notice: bool,
    pub clean_session: bool,
    pub will: Option<MqttWill<'a>>,
    /// SSL context to run the connection over, if any.
    pub ssl_ctx: Option<u8>,
}

impl Default for MqttOptions<'_> {
    fn default() -> Self {
        MqttOptions {
            version: 4,
            keepalive_secs: 120,
            pkt_timeout: 5,
            retries: 3,
            timeout_notice: false,
            clean_session: true,
            will: None,
            ssl_ctx: None,
        }
    }
}

/// One active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String<64>,
    pub qos: u8,
}

/// Owned, ordered subscription table keyed by topic.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: Vec<Subscription, MAX_SUBSCRIPTIONS>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        SubscriptionTable {
            entries: Vec::new(),
        }
    }

    /// Insert keeping topic order; an existing entry just has its QoS
    /// updated.
    pub fn insert(&mut self, topic: &str, qos: u8) -> Result<(), Error> {
        match self
            .entries
            .binary_search_by(|e| e.topic.as_str().cmp(topic))
        {
            Ok(index) => {
                self.entries[index].qos = qos;
                Ok(())
            }
            Err(index) => {
                let mut owned = String::new();
                owned.push_str(topic).map_err(|_| Error::Overflow)?;
                self.entries
                    .insert(
                        index,
                        Subscription {
                            topic: owned,
                            qos,
                        },
                    )
                    .map_err(|_| Error::Overflow)
            }
        }
    }

    /// Remove by topic, returning the subscription by value.
    pub fn remove(&mut self, topic: &str) -> Option<Subscription> {
        match self
            .entries
            .binary_search_by(|e| e.topic.as_str().cmp(topic))
        {
            Ok(index) => Some(self.entries.remove(index)),
            Err(_) => None,
        }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries
            .binary_search_by(|e| e.topic.as_str().cmp(topic))
            .is_ok()
    }

    pub fn as_slice(&self) -> &[Subscription] {
        &self.entries
    }
}

/// MQTT connection state, tracked locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttState {
    Closed,
    Opened,
    Connected,
}

/// One module-side MQTT client (the module supports ids 0..=5).
pub struct MqttClient<'a, W, CLK, C, const N: usize, const L: usize> {
    client: &'a Bg96Client<W, CLK, C, N, L>,
    id: u8,
    state: MqttState,
    next_msg_id: u16,
    subscriptions: SubscriptionTable,
}

impl<'a, W, CLK, C, const N: usize, const L: usize> MqttClient<'a, W, CLK, C, N, L>
where
    W: serial::Read<u8> + serial::Write<u8>,
    CLK: Clock,
    Generic<CLK::T>: TryInto<Milliseconds>,
    C: FnMut(SocketHandle, SocketEvent),
{
    pub fn new(client: &'a Bg96Client<W, CLK, C, N, L>, id: u8) -> Self {
        MqttClient {
            client,
            id,
            state: MqttState::Closed,
            next_msg_id: 1,
            subscriptions: SubscriptionTable::new(),
        }
    }

    pub fn state(&self) -> MqttState {
        self.state
    }

    /// Program the client options into the module.
    pub fn configure(&self, options: &MqttOptions<'_>) -> Result<(), Error> {
        let id = self.id;
        self.client.send_at(&MqttConfigVersion {
            id,
            version: options.version,
        })?;
        self.client.send_at(&MqttConfigPdpCid {
            id,
            ctx: self.client.context_id(),
        })?;
        self.client.send_at(&MqttConfigTimeout {
            id,
            pkt_timeout: options.pkt_timeout,
            retries: options.retries,
            notice: options.timeout_notice,
        })?;
        self.client.send_at(&MqttConfigSession {
            id,
            clean: options.clean_session,
        })?;
        self.client.send_at(&MqttConfigKeepAlive {
            id,
            seconds: options.keepalive_secs,
        })?;
        if let Some(ref will) = options.will {
            self.client.send_at(&MqttConfigWill {
                id,
                qos: will.qos,
                retain: will.retain,
                topic: will.topic,
                message: will.message,
            })?;
        }
        if let Some(ssl_ctx) = options.ssl_ctx {
            self.client.send_at(&MqttConfigSsl {
                id,
                enable: true,
                ssl_ctx,
            })?;
        }
        self.client.send_at(&MqttConfigRecvMode { id })?;
        Ok(())
    }

    /// Open the network connection to the broker.
    pub fn open(&mut self, hostname: &str, port: u16) -> Result<(), Error> {
        self.client.send_at(&MqttOpen {
            id: self.id,
            hostname,
            port,
        })?;
        self.state = MqttState::Opened;
        Ok(())
    }

    /// MQTT-level connect. Empty credentials are omitted from the command.
    pub fn connect(
        &mut self,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> Result<(), Error> {
        let result = self.client.send_at(&MqttConnect {
            id: self.id,
            client_id,
            username,
            password,
        })?;
        if result.result != 0 {
            return Err(Error::Device(result.result as i32));
        }
        if result.reason != 0 {
            warn!("broker rejected connect, reason {}", result.reason);
            return Err(Error::Device(result.reason as i32));
        }
        self.state = MqttState::Connected;
        Ok(())
    }

    pub fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), Error> {
        let msg_id = self.take_msg_id();
        let result = self.client.send_at(&MqttSubscribe {
            id: self.id,
            msg_id,
            topic,
            qos,
        })?;
        if result.result == 2 {
            return Err(Error::Device(result.result as i32));
        }
        self.subscriptions.insert(topic, qos)
    }

    /// Unsubscribe, returning the removed subscription if one existed.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<Option<Subscription>, Error> {
        if !self.subscriptions.contains(topic) {
            return Ok(None);
        }
        let msg_id = self.take_msg_id();
        let result = self.client.send_at(&MqttUnsubscribe {
            id: self.id,
            msg_id,
            topic,
        })?;
        if result.result == 2 {
            return Err(Error::Device(result.result as i32));
        }
        Ok(self.subscriptions.remove(topic))
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        self.subscriptions.as_slice()
    }

    /// Publish one message through the prompt-driven payload flow.
    pub fn publish(
        &mut self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), Error> {
        // msg_id 0 is reserved for (and required by) QoS 0.
        let msg_id = if qos == 0 { 0 } else { self.take_msg_id() };
        let line = {
            let mut channel = self.client.channel.try_borrow_mut()?;
            channel.send_payload(
                &MqttPublish {
                    id: self.id,
                    msg_id,
                    qos,
                    retain,
                    topic,
                    len: payload.len(),
                },
                payload,
                "+QMTPUB:",
            )?
        };
        let mut s = crate::command::scan::Scanner::new(line.as_str());
        s.literal("+QMTPUB:")?;
        let _id = s.u32()?;
        s.comma()?;
        let _msg_id = s.u32()?;
        s.comma()?;
        let result = s.u32()?;
        if result == 2 {
            return Err(Error::Device(result as i32));
        }
        Ok(())
    }

    /// Drain one buffered inbound publish, if any. The module buffers
    /// inbound traffic (`recv/mode`), so nothing lands on the shared
    /// command channel unsolicited.
    pub fn poll_inbound(&self) -> Result<Option<MqttInbound>, Error> {
        for recv_id in 0..RECV_SLOTS {
            if let Some(inbound) = self.client.send_at(&MqttReadStored {
                id: self.id,
                recv_id,
            })? {
                return Ok(Some(inbound));
            }
        }
        Ok(None)
    }

    pub fn disconnect(&mut self) -> Result<(), Error> {
        self.client.send_at(&MqttDisconnect { id: self.id })?;
        self.state = MqttState::Opened;
        Ok(())
    }

    /// Close the network connection.
    pub fn close(&mut self) -> Result<(), Error> {
        self.client.send_at(&MqttClose { id: self.id })?;
        self.state = MqttState::Closed;
        Ok(())
    }

    fn take_msg_id(&mut self) -> u16 {
        let id = self.next_msg_id;
        self.next_msg_id = self.next_msg_id.checked_add(1).unwrap_or(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_table_keeps_topic_order() {
        let mut table = SubscriptionTable::new();
        table.insert("sensors/b", 1).unwrap();
        table.insert("sensors/a", 0).unwrap();
        table.insert("alarms/#", 2).unwrap();

        let topics: Vec<&str, 8> = table.as_slice().iter().map(|s| s.topic.as_str()).collect();
        assert_eq!(topics.as_slice(), &["alarms/#", "sensors/a", "sensors/b"]);
    }

    #[test]
    fn reinserting_updates_qos_in_place() {
        let mut table = SubscriptionTable::new();
        table.insert("t", 0).unwrap();
        table.insert("t", 2).unwrap();
        assert_eq!(table.as_slice().len(), 1);
        assert_eq!(table.as_slice()[0].qos, 2);
    }

    #[test]
    fn remove_returns_the_subscription_by_value() {
        let mut table = SubscriptionTable::new();
        table.insert("a/b", 1).unwrap();
        let removed = table.remove("a/b").unwrap();
        assert_eq!(removed.topic.as_str(), "a/b");
        assert_eq!(removed.qos, 1);
        assert!(table.remove("a/b").is_none());
        assert!(!table.contains("a/b"));
    }

    #[test]
    fn table_capacity_is_bounded() {
        let mut table = SubscriptionTable::new();
        for i in 0..MAX_SUBSCRIPTIONS {
            let mut topic = heapless::String::<64>::new();
            core::fmt::Write::write_fmt(&mut topic, format_args!("t/{}", i)).unwrap();
            table.insert(&topic, 0).unwrap();
        }
        assert_eq!(table.insert("one-too-many", 0), Err(Error::Overflow));
    }
}
