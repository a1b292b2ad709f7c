use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Protocol states of an escrow trade, in protocol order. `DisputeOpened` and
/// `DisputeClosed` are a side path, `Failed` only happens during preparation.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
pub enum TradeState {
    Preparation,
    DepositPublished,
    DepositSeenInNetwork,
    DepositConfirmed,
    PaymentSent,
    PaymentReceived,
    PayoutPublished,
    PayoutSeenInNetwork,
    Completed,
    DisputeOpened,
    DisputeClosed,
    Failed,
}

impl TradeState {
    /// The transition table. Anything not listed here is rejected.
    pub fn valid_next_states(&self) -> &'static [TradeState] {
        use TradeState::*;

        match self {
            Preparation => &[DepositPublished, Failed],
            // The peer's confirmations can run ahead of ours, so its payment
            // message may land before our deposit listener reports
            DepositPublished => &[
                DepositSeenInNetwork,
                DepositConfirmed,
                PaymentSent,
                DisputeOpened,
                Failed,
            ],
            DepositSeenInNetwork => &[DepositConfirmed, PaymentSent, DisputeOpened],
            DepositConfirmed => &[PaymentSent, DisputeOpened],
            // The payout can be seen before the peer's message arrives
            PaymentSent => &[
                PaymentReceived,
                PayoutPublished,
                PayoutSeenInNetwork,
                DisputeOpened,
            ],
            PaymentReceived => &[PayoutPublished, PayoutSeenInNetwork, DisputeOpened],
            PayoutPublished => &[PayoutSeenInNetwork, Completed, DisputeOpened],
            PayoutSeenInNetwork => &[Completed],
            DisputeOpened => &[DisputeClosed, PayoutSeenInNetwork],
            DisputeClosed => &[Completed],
            Completed => &[],
            Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: TradeState) -> bool {
        self.valid_next_states().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_next_states().is_empty()
    }

    /// Whether `target` lies ahead of this state through one or more transitions
    pub fn can_reach(&self, target: TradeState) -> bool {
        let mut reached = vec![*self];
        let mut cursor = 0;
        while cursor < reached.len() {
            for next in reached[cursor].valid_next_states() {
                if *next == target {
                    return true;
                }
                if !reached.contains(next) {
                    reached.push(*next);
                }
            }
            cursor += 1;
        }
        false
    }

    /// Whether the deposit listener still has something to report
    pub fn awaits_deposit_confirmation(&self) -> bool {
        matches!(
            self,
            TradeState::DepositPublished | TradeState::DepositSeenInNetwork
        )
    }
}
