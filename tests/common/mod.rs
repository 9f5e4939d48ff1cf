#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use courtside::engine::{Engine, EngineSettings};
use courtside::gateway::{Charge, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway};
use courtside::hours::{DayHours, OperatingHours};
use courtside::model::*;

pub const WEBHOOK_SECRET: &str = "whsec_test";

/// 2030-01-07, a Monday.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

/// UTC instant on the test Monday.
pub fn at(hour: u32, minute: u32) -> Ms {
    monday()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

/// A week before the test Monday.
pub fn now() -> Ms {
    at(0, 0) - 7 * 24 * HOUR_MS
}

pub fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

pub fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("courtside_it");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    let _ = std::fs::remove_file(&path);
    path
}

/// Engine with one UTC venue open 06:00-22:00 daily and one court on it.
pub async fn engine_with_court(name: &str, settings: EngineSettings) -> (Arc<Engine>, Ulid) {
    let engine = Arc::new(Engine::new(wal_path(name), settings).unwrap());
    let venue_id = Ulid::new();
    engine
        .register_venue(Venue {
            id: venue_id,
            name: Some("Riverside".into()),
            utc_offset_minutes: 0,
            hours: OperatingHours::every_day(DayHours {
                open: "06:00".parse().unwrap(),
                close: "22:00".parse().unwrap(),
            }),
        })
        .await
        .unwrap();
    let court_id = Ulid::new();
    engine
        .register_court(Court {
            id: court_id,
            venue_id,
            name: Some("Court 1".into()),
            hourly_rate: dec(250),
            active: true,
        })
        .await
        .unwrap();
    (engine, court_id)
}

#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Paid,
    Pending,
    Reject,
}

/// Gateway double that counts charge attempts.
pub struct MockGateway {
    reply: Reply,
    calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment(&self, req: &ChargeRequest) -> Result<Charge, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let status = match self.reply {
            Reply::Paid => ChargeStatus::Paid,
            Reply::Pending => ChargeStatus::Pending,
            Reply::Reject => {
                return Err(GatewayError::Rejected {
                    status: 402,
                    body: "card declined".into(),
                });
            }
        };
        Ok(Charge {
            id: format!("pay_{n}"),
            status,
            amount: req.amount,
        })
    }
}
