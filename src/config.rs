use std::time::Duration;
use anyhow::bail;
use crate::frame::DataFrame;
use crate::types::NodeId;

pub struct LtpConfig {
    /// Our own node id. Fragments received in response to our own requests are buffered
    ///  under this id.
    pub local_node_id: NodeId,

    /// MTU of the network underneath the substrate. The fragment payload is derived from this
    ///  after subtracting the ids, the substrate's header and the DATA header.
    pub mtu: usize,
    pub icn_header_length: usize,

    /// Upper bound for the combined length of CID and rCID. Used only to validate that the
    ///  MTU leaves room for a payload.
    pub max_id_length: usize,

    /// number of fragments (not bytes) that may be sent before a WU / WUD exchange
    pub initial_credit: u16,

    pub rtt_list_size: usize,
    pub initial_rtt: Duration,
    pub rtt_multiplier: u32,

    /// number of attempts for every handshake: WE, WU, SE, RST
    pub max_retries: u32,

    /// idle time after which buffered state is reclaimed by the cleaners
    pub timeout: Duration,
    pub buffer_cleaner_interval: Duration,
}

impl LtpConfig {
    pub fn default_nap(local_node_id: NodeId) -> LtpConfig {
        LtpConfig {
            local_node_id,
            mtu: 1500,
            icn_header_length: 20,
            max_id_length: 256,
            initial_credit: 10,
            rtt_list_size: 10,
            initial_rtt: Duration::from_millis(200),
            rtt_multiplier: 2,
            max_retries: 23,
            timeout: Duration::from_secs(540),
            buffer_cleaner_interval: Duration::from_secs(10),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu <= self.max_id_length + self.icn_header_length + DataFrame::HEADER_LEN + 8 {
            bail!("MTU {} leaves no room for fragment payload", self.mtu);
        }
        if self.mtu > u16::MAX as usize {
            bail!("MTU {} exceeds the frame's length field", self.mtu);
        }
        if self.initial_credit == 0 {
            bail!("initial credit must be at least one fragment");
        }
        if self.rtt_list_size == 0 {
            bail!("RTT list size must be at least 1");
        }
        if self.rtt_multiplier == 0 {
            bail!("RTT multiplier must be at least 1");
        }
        if self.max_retries == 0 {
            bail!("at least one attempt is required for control messages");
        }
        if self.buffer_cleaner_interval.is_zero() {
            bail!("buffer cleaner interval must not be zero");
        }

        Ok(())
    }

    /// The number of payload bytes a single DATA frame can carry for the given pair of ids
    pub fn max_fragment_payload(&self, id_lengths: usize) -> usize {
        let raw = self.mtu
            .saturating_sub(id_lengths)
            .saturating_sub(self.icn_header_length)
            .saturating_sub(DataFrame::HEADER_LEN);
        raw - (raw % 8)
    }
}
