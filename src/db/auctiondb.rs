// db/auctiondb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Error, PgConnection};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::auctionmodel::*;

/// Failure of an auction write transaction. Nothing is committed in any case.
#[derive(Debug)]
pub enum AuctionTxError {
    NotFound,
    Rejected(AuctionRejection),
    Database(Error),
}

impl From<Error> for AuctionTxError {
    fn from(err: Error) -> Self {
        AuctionTxError::Database(err)
    }
}

impl From<AuctionRejection> for AuctionTxError {
    fn from(rejection: AuctionRejection) -> Self {
        AuctionTxError::Rejected(rejection)
    }
}

#[async_trait]
pub trait AuctionExt {
    async fn create_auction(
        &self,
        created_by: Uuid,
        auction: NewAuction,
    ) -> Result<Auction, Error>;

    async fn get_auction(
        &self,
        auction_id: i64,
    ) -> Result<Option<Auction>, Error>;

    async fn list_auctions(
        &self,
        status: Option<AuctionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Auction>, i64), Error>;

    async fn list_bids(
        &self,
        auction_id: i64,
    ) -> Result<Vec<BidWithBidder>, Error>;

    async fn place_bid(
        &self,
        auction_id: i64,
        bidder_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<BidPlacement, AuctionTxError>;

    async fn activate_auction(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Auction, AuctionTxError>;

    async fn settle_auction(
        &self,
        auction_id: i64,
    ) -> Result<Settlement, AuctionTxError>;

    async fn cancel_auction(
        &self,
        auction_id: i64,
    ) -> Result<Auction, AuctionTxError>;

    async fn extend_auction(
        &self,
        auction_id: i64,
        minutes: i64,
    ) -> Result<Auction, AuctionTxError>;

    /// Auctions whose bids break the single-winner-flag rule, with detail.
    async fn find_winner_flag_violations(&self) -> Result<Vec<(i64, String)>, Error>;
}

async fn lock_auction(conn: &mut PgConnection, auction_id: i64) -> Result<Auction, AuctionTxError> {
    sqlx::query_as::<_, Auction>("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
        .bind(auction_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AuctionTxError::NotFound)
}

async fn auction_bids(conn: &mut PgConnection, auction_id: i64) -> Result<Vec<Bid>, Error> {
    sqlx::query_as::<_, Bid>(
        r#"
        SELECT * FROM bids
        WHERE auction_id = $1
        ORDER BY created_at ASC, id ASC
        "#
    )
    .bind(auction_id)
    .fetch_all(&mut *conn)
    .await
}

#[async_trait]
impl AuctionExt for DBClient {
    async fn create_auction(
        &self,
        created_by: Uuid,
        auction: NewAuction,
    ) -> Result<Auction, Error> {
        sqlx::query_as::<_, Auction>(
            r#"
            INSERT INTO auctions
            (product_id, title, starting_bid, current_bid, bid_increment, reserve_price,
             status, start_date, end_date, created_by)
            VALUES ($1, $2, $3, $3, $4, $5, 'draft', $6, $7, $8)
            RETURNING *
            "#
        )
        .bind(auction.product_id)
        .bind(auction.title)
        .bind(auction.starting_bid)
        .bind(auction.bid_increment)
        .bind(auction.reserve_price)
        .bind(auction.start_date)
        .bind(auction.end_date)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_auction(
        &self,
        auction_id: i64,
    ) -> Result<Option<Auction>, Error> {
        sqlx::query_as::<_, Auction>("SELECT * FROM auctions WHERE id = $1")
            .bind(auction_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn list_auctions(
        &self,
        status: Option<AuctionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Auction>, i64), Error> {
        let auctions = sqlx::query_as::<_, Auction>(
            r#"
            SELECT * FROM auctions
            WHERE ($1::auction_status IS NULL OR status = $1)
            ORDER BY end_date ASC, id ASC
            LIMIT $2 OFFSET $3
            "#
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM auctions WHERE ($1::auction_status IS NULL OR status = $1)"
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok((auctions, total))
    }

    async fn list_bids(
        &self,
        auction_id: i64,
    ) -> Result<Vec<BidWithBidder>, Error> {
        sqlx::query_as::<_, BidWithBidder>(
            r#"
            SELECT b.*, u.name AS bidder_name
            FROM bids b
            JOIN users u ON u.id = b.bidder_id
            WHERE b.auction_id = $1
            ORDER BY b.bid_amount DESC, b.created_at ASC, b.id ASC
            "#
        )
        .bind(auction_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn place_bid(
        &self,
        auction_id: i64,
        bidder_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<BidPlacement, AuctionTxError> {
        let mut tx = self.pool.begin().await?;

        // Row lock: concurrent bids queue here and each re-reads the latest
        // committed current_bid before validating.
        let auction = lock_auction(&mut tx, auction_id).await?;

        let own_best = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(bid_amount) FROM bids WHERE auction_id = $1 AND bidder_id = $2"
        )
        .bind(auction_id)
        .bind(bidder_id)
        .fetch_one(&mut *tx)
        .await?;

        auction.admit_bid(own_best, amount, now)?;

        let demoted = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE bids SET is_winning = FALSE
            WHERE auction_id = $1 AND is_winning
            RETURNING bidder_id
            "#
        )
        .bind(auction_id)
        .fetch_all(&mut *tx)
        .await?;

        if demoted.len() > 1 {
            tracing::error!(
                auction_id,
                flagged = demoted.len(),
                "🚨 Multiple winning bids found while admitting a new bid"
            );
            return Err(AuctionRejection::InvariantViolation(format!(
                "auction {} had {} winning bids",
                auction_id,
                demoted.len()
            ))
            .into());
        }

        let bid = sqlx::query_as::<_, Bid>(
            r#"
            INSERT INTO bids (auction_id, bidder_id, bid_amount, is_winning)
            VALUES ($1, $2, $3, TRUE)
            RETURNING *
            "#
        )
        .bind(auction_id)
        .bind(bidder_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        // Counters are recomputed from the ledger, never incremented blindly.
        let updated = sqlx::query_as::<_, Auction>(
            r#"
            UPDATE auctions
            SET current_bid = $2,
                total_bids = (SELECT COUNT(*) FROM bids WHERE auction_id = $1),
                total_bidders = (SELECT COUNT(DISTINCT bidder_id) FROM bids WHERE auction_id = $1),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(auction_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        if updated.current_bid < auction.current_bid {
            tracing::error!(
                auction_id,
                before = auction.current_bid,
                after = updated.current_bid,
                "🚨 current_bid would decrease"
            );
            return Err(AuctionRejection::InvariantViolation(format!(
                "current_bid of auction {} would drop from {} to {}",
                auction_id, auction.current_bid, updated.current_bid
            ))
            .into());
        }

        tx.commit().await?;

        Ok(BidPlacement {
            auction: updated,
            bid,
            previous_winner: demoted.into_iter().next(),
        })
    }

    async fn activate_auction(
        &self,
        auction_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Auction, AuctionTxError> {
        let mut tx = self.pool.begin().await?;

        let auction = lock_auction(&mut tx, auction_id).await?;
        let target = auction.activation_target(now)?;

        let updated = sqlx::query_as::<_, Auction>(
            r#"
            UPDATE auctions SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(auction_id)
        .bind(target)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn settle_auction(
        &self,
        auction_id: i64,
    ) -> Result<Settlement, AuctionTxError> {
        let mut tx = self.pool.begin().await?;

        let auction = lock_auction(&mut tx, auction_id).await?;
        auction.check_settleable()?;

        let bids = auction_bids(&mut tx, auction_id).await?;
        if let Err(detail) = check_winner_flags(&bids) {
            tracing::error!(auction_id, %detail, "🚨 Refusing to settle auction with inconsistent winner flags");
            return Err(AuctionRejection::InvariantViolation(detail).into());
        }

        let decision = auction.decide_settlement(&bids);

        let updated = sqlx::query_as::<_, Auction>(
            r#"
            UPDATE auctions
            SET status = 'ended', winner_id = $2, winning_bid = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND winner_id IS NULL
            RETURNING *
            "#
        )
        .bind(auction_id)
        .bind(decision.winner_id)
        .bind(decision.winning_bid)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AuctionRejection::AlreadySettled)?;

        tx.commit().await?;

        let winning = if decision.winner_id.is_some() {
            select_winner(&bids).cloned()
        } else {
            None
        };

        Ok(Settlement {
            auction: updated,
            winning,
            reserve_met: decision.reserve_met,
        })
    }

    async fn cancel_auction(
        &self,
        auction_id: i64,
    ) -> Result<Auction, AuctionTxError> {
        let mut tx = self.pool.begin().await?;

        let auction = lock_auction(&mut tx, auction_id).await?;
        auction.check_cancellable()?;

        let updated = sqlx::query_as::<_, Auction>(
            r#"
            UPDATE auctions SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(auction_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn extend_auction(
        &self,
        auction_id: i64,
        minutes: i64,
    ) -> Result<Auction, AuctionTxError> {
        let mut tx = self.pool.begin().await?;

        let auction = lock_auction(&mut tx, auction_id).await?;
        auction.check_extendable(minutes)?;

        let updated = sqlx::query_as::<_, Auction>(
            r#"
            UPDATE auctions
            SET end_date = end_date + make_interval(mins => $2), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(auction_id)
        .bind(minutes as i32)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn find_winner_flag_violations(&self) -> Result<Vec<(i64, String)>, Error> {
        let suspects = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT auction_id FROM bids
            GROUP BY auction_id
            HAVING COUNT(*) FILTER (WHERE is_winning) <> 1
            UNION
            SELECT w.auction_id FROM bids w
            WHERE w.is_winning
              AND EXISTS (
                  SELECT 1 FROM bids o
                  WHERE o.auction_id = w.auction_id
                    AND (o.bid_amount > w.bid_amount
                         OR (o.bid_amount = w.bid_amount
                             AND (o.created_at, o.id) < (w.created_at, w.id)))
              )
            "#
        )
        .fetch_all(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let mut violations = Vec::new();
        for auction_id in suspects {
            let bids = auction_bids(&mut conn, auction_id).await?;
            if let Err(detail) = check_winner_flags(&bids) {
                violations.push((auction_id, detail));
            }
        }

        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::postgres::PgPoolOptions;

    async fn seed_user(db: &DBClient, name: &str) -> Uuid {
        sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO users (name, email) VALUES ($1, $2) RETURNING id"
        )
        .bind(name)
        .bind(format!("{}-{}@example.com", name, Uuid::new_v4()))
        .fetch_one(&db.pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn concurrent_equal_bids_admit_exactly_one() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let db = DBClient::new(pool);

        let admin = seed_user(&db, "admin").await;
        let x = seed_user(&db, "x").await;
        let y = seed_user(&db, "y").await;

        let now = Utc::now();
        let auction = db
            .create_auction(
                admin,
                NewAuction {
                    product_id: 1,
                    title: "Race".to_string(),
                    starting_bid: 100,
                    bid_increment: 10,
                    reserve_price: None,
                    start_date: now - Duration::minutes(5),
                    end_date: now + Duration::hours(1),
                },
            )
            .await
            .unwrap();
        db.activate_auction(auction.id, now).await.unwrap();
        db.place_bid(auction.id, admin, 110, Utc::now()).await.unwrap();

        let (a, b) = tokio::join!(
            db.place_bid(auction.id, x, 120, Utc::now()),
            db.place_bid(auction.id, y, 120, Utc::now()),
        );

        let admitted = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(admitted, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(
            loser,
            Err(AuctionTxError::Rejected(AuctionRejection::BidTooLow { minimum: 130 }))
        ));

        let stored = db.get_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(stored.current_bid, 120);
        assert_eq!(stored.total_bids, 2);

        let bids = db.list_bids(auction.id).await.unwrap();
        assert_eq!(bids.iter().filter(|b| b.bid.is_winning).count(), 1);
        assert!(db.find_winner_flag_violations().await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
    async fn settled_auction_is_terminal() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let db = DBClient::new(pool);

        let admin = seed_user(&db, "admin").await;
        let x = seed_user(&db, "x").await;
        let y = seed_user(&db, "y").await;
        let z = seed_user(&db, "z").await;

        let now = Utc::now();
        let auction = db
            .create_auction(
                admin,
                NewAuction {
                    product_id: 2,
                    title: "Settle".to_string(),
                    starting_bid: 100,
                    bid_increment: 10,
                    reserve_price: None,
                    start_date: now - Duration::minutes(5),
                    end_date: now + Duration::hours(1),
                },
            )
            .await
            .unwrap();
        db.activate_auction(auction.id, now).await.unwrap();
        db.place_bid(auction.id, x, 150, Utc::now()).await.unwrap();
        db.place_bid(auction.id, y, 200, Utc::now()).await.unwrap();

        let settlement = db.settle_auction(auction.id).await.unwrap();
        assert_eq!(settlement.auction.status, AuctionStatus::Ended);
        assert_eq!(settlement.auction.winner_id, Some(y));
        assert_eq!(settlement.auction.winning_bid, Some(200));
        assert!(settlement.reserve_met);

        assert!(matches!(
            db.place_bid(auction.id, z, 300, Utc::now()).await,
            Err(AuctionTxError::Rejected(AuctionRejection::NotActive {
                status: AuctionStatus::Ended
            }))
        ));
        assert!(matches!(
            db.settle_auction(auction.id).await,
            Err(AuctionTxError::Rejected(AuctionRejection::AlreadySettled))
        ));

        let stored = db.get_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(stored.winner_id, Some(y));
        assert_eq!(stored.winning_bid, Some(200));
        assert_eq!(stored.current_bid, 200);
    }
}
