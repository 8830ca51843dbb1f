// models/auctionmodel.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_EXTENSION_MINUTES: i64 = 1;
pub const MAX_EXTENSION_MINUTES: i64 = 1440;
/// Upper bound for any price or bid, in minor units.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000_000;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "auction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Draft,
    Scheduled,
    Active,
    Ended,
    Cancelled,
}

impl AuctionStatus {
    pub fn to_str(&self) -> &str {
        match self {
            AuctionStatus::Draft => "draft",
            AuctionStatus::Scheduled => "scheduled",
            AuctionStatus::Active => "active",
            AuctionStatus::Ended => "ended",
            AuctionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Auction {
    pub id: i64,
    pub product_id: i64,
    pub title: String,
    pub starting_bid: i64,
    pub current_bid: i64,
    pub bid_increment: i64,
    pub reserve_price: Option<i64>,
    pub status: AuctionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub winner_id: Option<Uuid>,
    pub winning_bid: Option<i64>,
    pub total_bids: i32,
    pub total_bidders: i32,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Bid {
    pub id: i64,
    pub auction_id: i64,
    pub bidder_id: Uuid,
    pub bid_amount: i64,
    pub is_winning: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct BidWithBidder {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub bid: Bid,
    pub bidder_name: String,
}

/// Why the bidding engine refused a request. These are business outcomes,
/// not faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuctionRejection {
    NotActive { status: AuctionStatus },
    BidTooLow { minimum: i64 },
    DuplicateBid { own_best: i64 },
    AlreadySettled,
    InvalidTransition { from: AuctionStatus, to: AuctionStatus },
    ExtensionOutOfRange { minutes: i64 },
    AmountOutOfRange { max: i64 },
    InvariantViolation(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct BidPlacement {
    pub auction: Auction,
    pub bid: Bid,
    pub previous_winner: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub auction: Auction,
    pub winning: Option<Bid>,
    pub reserve_met: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementDecision {
    pub winner_id: Option<Uuid>,
    pub winning_bid: Option<i64>,
    pub reserve_met: bool,
}

#[derive(Debug, Clone)]
pub struct NewAuction {
    pub product_id: i64,
    pub title: String,
    pub starting_bid: i64,
    pub bid_increment: i64,
    pub reserve_price: Option<i64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl NewAuction {
    pub fn check(&self) -> Result<(), String> {
        if self.starting_bid <= 0 {
            return Err("Starting bid must be positive".to_string());
        }
        if self.bid_increment <= 0 {
            return Err("Bid increment must be positive".to_string());
        }
        let amounts = [Some(self.starting_bid), Some(self.bid_increment), self.reserve_price];
        if amounts.into_iter().flatten().any(|amount| amount > MAX_AMOUNT) {
            return Err(format!("Amounts cannot exceed {}", MAX_AMOUNT));
        }
        if self.end_date <= self.start_date {
            return Err("End date must be after start date".to_string());
        }
        if let Some(reserve) = self.reserve_price {
            if reserve < self.starting_bid {
                return Err("Reserve price cannot be below the starting bid".to_string());
            }
        }
        Ok(())
    }
}

impl Auction {
    /// `None` once no bid within `MAX_AMOUNT` can beat the current price.
    pub fn minimum_next_bid(&self) -> Option<i64> {
        self.current_bid
            .checked_add(self.bid_increment)
            .filter(|minimum| *minimum <= MAX_AMOUNT)
    }

    pub fn accepts_bids_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AuctionStatus::Active && self.start_date <= now && now < self.end_date
    }

    /// Admission gate for a bid, evaluated against the row as locked inside
    /// the bid transaction. `own_best` is the bidder's highest admitted bid.
    pub fn admit_bid(
        &self,
        own_best: Option<i64>,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<(), AuctionRejection> {
        if !self.accepts_bids_at(now) {
            return Err(AuctionRejection::NotActive { status: self.status });
        }

        if amount > MAX_AMOUNT {
            return Err(AuctionRejection::AmountOutOfRange { max: MAX_AMOUNT });
        }

        match self.minimum_next_bid() {
            Some(minimum) if amount < minimum => {
                return Err(AuctionRejection::BidTooLow { minimum });
            }
            Some(_) => {}
            None => return Err(AuctionRejection::AmountOutOfRange { max: MAX_AMOUNT }),
        }

        if let Some(best) = own_best {
            if best >= amount {
                return Err(AuctionRejection::DuplicateBid { own_best: best });
            }
        }

        Ok(())
    }

    /// Status an admin activation moves this auction into.
    pub fn activation_target(&self, now: DateTime<Utc>) -> Result<AuctionStatus, AuctionRejection> {
        match self.status {
            AuctionStatus::Draft | AuctionStatus::Scheduled => {
                if now >= self.end_date {
                    Err(AuctionRejection::InvalidTransition {
                        from: self.status,
                        to: AuctionStatus::Active,
                    })
                } else if now < self.start_date {
                    if self.status == AuctionStatus::Scheduled {
                        Err(AuctionRejection::InvalidTransition {
                            from: self.status,
                            to: AuctionStatus::Active,
                        })
                    } else {
                        Ok(AuctionStatus::Scheduled)
                    }
                } else {
                    Ok(AuctionStatus::Active)
                }
            }
            AuctionStatus::Ended => Err(AuctionRejection::AlreadySettled),
            other => Err(AuctionRejection::InvalidTransition {
                from: other,
                to: AuctionStatus::Active,
            }),
        }
    }

    pub fn check_cancellable(&self) -> Result<(), AuctionRejection> {
        match self.status {
            AuctionStatus::Draft | AuctionStatus::Scheduled | AuctionStatus::Active => Ok(()),
            AuctionStatus::Ended => Err(AuctionRejection::AlreadySettled),
            AuctionStatus::Cancelled => Err(AuctionRejection::InvalidTransition {
                from: AuctionStatus::Cancelled,
                to: AuctionStatus::Cancelled,
            }),
        }
    }

    pub fn check_settleable(&self) -> Result<(), AuctionRejection> {
        match self.status {
            AuctionStatus::Active => Ok(()),
            AuctionStatus::Ended => Err(AuctionRejection::AlreadySettled),
            other => Err(AuctionRejection::InvalidTransition {
                from: other,
                to: AuctionStatus::Ended,
            }),
        }
    }

    pub fn check_extendable(&self, minutes: i64) -> Result<(), AuctionRejection> {
        if !(MIN_EXTENSION_MINUTES..=MAX_EXTENSION_MINUTES).contains(&minutes) {
            return Err(AuctionRejection::ExtensionOutOfRange { minutes });
        }
        if self.status != AuctionStatus::Active {
            return Err(AuctionRejection::NotActive { status: self.status });
        }
        Ok(())
    }

    /// Winner determination over every admitted bid. A bid below the reserve
    /// price ends the auction without a winner.
    pub fn decide_settlement(&self, bids: &[Bid]) -> SettlementDecision {
        match select_winner(bids) {
            Some(top) => {
                let reserve_met = self.reserve_price.map_or(true, |reserve| top.bid_amount >= reserve);
                if reserve_met {
                    SettlementDecision {
                        winner_id: Some(top.bidder_id),
                        winning_bid: Some(top.bid_amount),
                        reserve_met,
                    }
                } else {
                    SettlementDecision { winner_id: None, winning_bid: None, reserve_met }
                }
            }
            None => SettlementDecision { winner_id: None, winning_bid: None, reserve_met: false },
        }
    }
}

/// Highest amount wins; ties go to the earliest bid (then lowest id).
pub fn select_winner(bids: &[Bid]) -> Option<&Bid> {
    bids.iter().min_by(|a, b| {
        b.bid_amount
            .cmp(&a.bid_amount)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    })
}

/// Verifies the single-winner-flag invariant: no bids means no flag,
/// otherwise exactly one flag and it sits on the top bid.
pub fn check_winner_flags(bids: &[Bid]) -> Result<(), String> {
    let flagged: Vec<&Bid> = bids.iter().filter(|b| b.is_winning).collect();
    match (select_winner(bids), flagged.as_slice()) {
        (None, []) => Ok(()),
        (Some(top), [only]) if only.id == top.id => Ok(()),
        (Some(top), [only]) => Err(format!(
            "bid {} is flagged winning but bid {} holds the top amount {}",
            only.id, top.id, top.bid_amount
        )),
        (_, flags) => Err(format!(
            "expected exactly one winning bid, found {} flagged out of {}",
            flags.len(),
            bids.len()
        )),
    }
}
