use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use super::builder::{CreateBundle, NewBundleItem};
use super::engine::{EngineConfig, SettlementEngine};
use super::memory::{CompanyRecord, LedgerSeed, ManagerRecord, MemorySettlementStore, OrderRecord};
use super::models::*;

/// A bundle row with plausible values, not backed by any ledger data
pub(crate) fn sample_bundle(id: Uuid) -> Bundle {
    let now = Utc::now();
    Bundle {
        id,
        side: Side::Sales,
        counterparty_id: Uuid::new_v4(),
        counterparty: CompanySnapshot {
            name: "Hanbit Logistics".to_string(),
            business_number: Some("220-81-62517".to_string()),
            ceo_name: Some("Park Jiwoo".to_string()),
        },
        manager_id: Uuid::new_v4(),
        manager: ManagerSnapshot {
            name: "Kim Minjun".to_string(),
            email: Some("minjun@broker.test".to_string()),
            phone: None,
        },
        payment: PaymentInfo::default(),
        period_type: PeriodType::Departure,
        period_from: march(1),
        period_to: march(31),
        status: BundleStatus::Draft,
        tax_rate: dec!(0.1),
        totals: Totals::default(),
        invoice_no: None,
        invoice_issued_at: None,
        deposit_received_at: None,
        settled_at: None,
        canceled_at: None,
        memo: None,
        order_count: 0,
        version: 1,
        created_by: Uuid::nil(),
        updated_by: None,
        created_at: now,
        updated_at: now,
    }
}

fn march(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap_or_default()
}

/// Memory store seeded with one shipper, one carrier and one manager
pub(crate) struct Fixture {
    pub store: MemorySettlementStore,
    pub engine: SettlementEngine,
    pub shipper: Uuid,
    pub carrier: Uuid,
    pub manager: Uuid,
    pub actor: Actor,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let store = MemorySettlementStore::new();
        let shipper = Uuid::new_v4();
        let carrier = Uuid::new_v4();
        let manager = Uuid::new_v4();

        store
            .seed(LedgerSeed {
                companies: vec![
                    CompanyRecord {
                        id: shipper,
                        name: "Hanbit Logistics".to_string(),
                        business_number: Some("220-81-62517".to_string()),
                        ceo_name: Some("Park Jiwoo".to_string()),
                        payment: PaymentInfo {
                            method: Some("transfer".to_string()),
                            bank_code: Some("004".to_string()),
                            bank_account: Some("123-456-789012".to_string()),
                            bank_holder: Some("Hanbit Logistics".to_string()),
                        },
                    },
                    CompanyRecord {
                        id: carrier,
                        name: "Daehan Transport".to_string(),
                        business_number: Some("105-86-33021".to_string()),
                        ceo_name: None,
                        payment: PaymentInfo::default(),
                    },
                ],
                managers: vec![ManagerRecord {
                    id: manager,
                    name: "Kim Minjun".to_string(),
                    email: Some("minjun@broker.test".to_string()),
                    phone: Some("010-1234-5678".to_string()),
                }],
                orders: Vec::new(),
            })
            .await;

        let engine = SettlementEngine::new(Arc::new(store.clone()), config);
        let actor = Actor {
            id: Uuid::new_v4(),
            name: Some("Lee Seoyeon".to_string()),
            email: None,
            access_level: Some("admin".to_string()),
        };

        Self {
            store,
            engine,
            shipper,
            carrier,
            manager,
            actor,
        }
    }

    pub fn counterparty(&self, side: Side) -> Uuid {
        match side {
            Side::Sales => self.shipper,
            Side::Purchase => self.carrier,
        }
    }

    /// Add completed, unsettled ledger charges for the side's counterparty
    pub async fn orders(&self, side: Side, amounts: &[Decimal]) -> Vec<Uuid> {
        let counterparty_id = self.counterparty(side);
        let orders: Vec<OrderRecord> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| OrderRecord {
                order_id: Uuid::new_v4(),
                side,
                counterparty_id,
                amount: *amount,
                completed: true,
                departure_date: Some(march(1 + i as u32 % 28)),
                arrival_date: Some(march(2 + i as u32 % 28)),
                created_at: Utc::now(),
                bundle_id: None,
            })
            .collect();
        let ids = orders.iter().map(|order| order.order_id).collect();

        self.store
            .seed(LedgerSeed {
                orders,
                ..LedgerSeed::default()
            })
            .await;
        ids
    }

    /// Create command for the given orders, amounts taken from the ledger
    pub fn command(&self, side: Side, order_ids: &[Uuid]) -> CreateBundle {
        CreateBundle {
            side,
            counterparty_id: self.counterparty(side),
            manager_id: self.manager,
            period_type: PeriodType::Departure,
            period_from: march(1),
            period_to: march(31),
            items: order_ids
                .iter()
                .map(|order_id| NewBundleItem {
                    order_id: *order_id,
                    base_amount: None,
                })
                .collect(),
            adjustments: Vec::new(),
            payment: None,
            tax_exempt: false,
            memo: None,
        }
    }

    /// Seed orders and bundle them in one go
    pub async fn bundle(&self, side: Side, amounts: &[Decimal]) -> BundleDetail {
        let orders = self.orders(side, amounts).await;
        self.engine
            .create_bundle(self.command(side, &orders), &self.actor)
            .await
            .expect("fixture bundle")
    }
}
