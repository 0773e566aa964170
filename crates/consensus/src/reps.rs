//! Representative register.
//!
//! Tracks which representatives are reachable and what quorum the
//! elections must reach. Weights come from the ledger; the channel
//! mapping is fed by the network layer as handshakes identify peers.

use lattix_ledger::Ledger;
use lattix_network::TcpChannel;
use lattix_types::{Account, Amount};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A representative and the channel it is reachable through, when
/// online.
#[derive(Clone)]
pub struct Representative {
    /// Representative account
    pub account: Account,
    /// Channel to the representative's node, if connected
    pub channel: Option<Arc<TcpChannel>>,
}

/// Register of known representatives and the quorum requirement.
pub struct RepresentativeRegister {
    ledger: Arc<Ledger>,
    /// Weight a block must accumulate to be confirmed
    quorum_delta: Mutex<Amount>,
    channels: Mutex<HashMap<Account, Option<Arc<TcpChannel>>>>,
}

impl RepresentativeRegister {
    /// Creates a register with a fixed quorum delta.
    pub fn new(ledger: Arc<Ledger>, quorum_delta: Amount) -> Self {
        Self {
            ledger,
            quorum_delta: Mutex::new(quorum_delta),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// A representative's current voting weight.
    pub fn weight(&self, representative: &Account) -> Amount {
        self.ledger.weight(representative)
    }

    /// The weight a block must accumulate to be confirmed.
    pub fn quorum_delta(&self) -> Amount {
        *self.quorum_delta.lock()
    }

    /// Replaces the quorum requirement, e.g. as online weight shifts.
    pub fn set_quorum_delta(&self, quorum_delta: Amount) {
        *self.quorum_delta.lock() = quorum_delta;
    }

    /// Registers a representative, optionally with the channel it was
    /// observed on.
    pub fn track(&self, representative: Account, channel: Option<Arc<TcpChannel>>) {
        self.channels.lock().insert(representative, channel);
    }

    /// Principal representatives: tracked reps whose weight reaches
    /// 0.1% of the quorum requirement, heaviest first, at most `max`.
    pub fn principal_representatives(&self, max: usize) -> Vec<Representative> {
        let threshold = Amount::raw(self.quorum_delta().number() / 1000);
        let channels = self.channels.lock();
        let mut reps: Vec<(Amount, Representative)> = channels
            .iter()
            .map(|(account, channel)| {
                (
                    self.weight(account),
                    Representative {
                        account: *account,
                        channel: channel.clone(),
                    },
                )
            })
            .filter(|(weight, _)| *weight >= threshold && !weight.is_zero())
            .collect();
        reps.sort_by(|(weight_a, _), (weight_b, _)| weight_b.cmp(weight_a));
        reps.truncate(max);
        reps.into_iter().map(|(_, rep)| rep).collect()
    }

    /// Number of tracked representatives.
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    /// True when no representatives are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
