use chrono::{DateTime, Utc};

use trustline_core::domain::order::{Order, OrderId, OrderStatus, PhoneNumber};

use crate::repositories::{OrderRepository, RepositoryError};

/// Deterministic demo orders covering every verification path: a phone that
/// owns one order, a phone that owns several, and each delivery status the
/// complaint eligibility rules care about.
const SEED_ORDERS: &[SeedOrderContract] = &[
    SeedOrderContract {
        order_id: "ORD-001",
        customer_name: "Lina Haddad",
        phone: "+962791234567",
        status: OrderStatus::Delivered,
        description: "Delivered order; phone also owns ORD-003",
    },
    SeedOrderContract {
        order_id: "ORD-002",
        customer_name: "Omar Khalil",
        phone: "+962781112233",
        status: OrderStatus::OutForDelivery,
        description: "In transit; delivery-only complaint categories are refused",
    },
    SeedOrderContract {
        order_id: "ORD-003",
        customer_name: "Lina Haddad",
        phone: "+962791234567",
        status: OrderStatus::Preparing,
        description: "Second order on the same phone for the candidate list",
    },
    SeedOrderContract {
        order_id: "ORD-004",
        customer_name: "Sara Nasser",
        phone: "+962775556677",
        status: OrderStatus::Delivered,
        description: "Single delivered order; phone-first lookup verifies directly",
    },
    SeedOrderContract {
        order_id: "ORD-005",
        customer_name: "Yousef Saleh",
        phone: "+962799998888",
        status: OrderStatus::Cancelled,
        description: "Cancelled order",
    },
];

#[derive(Debug, Clone, Copy)]
struct SeedOrderContract {
    order_id: &'static str,
    customer_name: &'static str,
    phone: &'static str,
    status: OrderStatus,
    description: &'static str,
}

impl SeedOrderContract {
    fn to_order(self, now: DateTime<Utc>) -> Order {
        Order {
            id: OrderId(self.order_id.to_owned()),
            customer_name: self.customer_name.to_owned(),
            phone: PhoneNumber(self.phone.to_owned()),
            status: self.status,
            updated_at: now,
        }
    }
}

pub struct DemoDataset;

impl DemoDataset {
    pub fn orders(now: DateTime<Utc>) -> Vec<Order> {
        SEED_ORDERS.iter().map(|contract| contract.to_order(now)).collect()
    }

    /// Upserts the demo orders; safe to run repeatedly.
    pub async fn load(repo: &dyn OrderRepository) -> Result<SeedResult, RepositoryError> {
        let now = Utc::now();
        for contract in SEED_ORDERS {
            repo.save(contract.to_order(now)).await?;
        }

        let orders_seeded = SEED_ORDERS
            .iter()
            .map(|contract| OrderSeedInfo {
                order_id: contract.order_id,
                description: contract.description,
            })
            .collect();
        Ok(SeedResult { orders_seeded })
    }

    pub async fn verify(repo: &dyn OrderRepository) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();
        for contract in SEED_ORDERS {
            let stored = repo.find_by_id(&OrderId(contract.order_id.to_owned())).await?;
            let matches = stored.is_some_and(|order| {
                order.phone.0 == contract.phone && order.status == contract.status
            });
            checks.push((contract.order_id, matches));
        }
        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub orders_seeded: Vec<OrderSeedInfo>,
}

#[derive(Debug)]
pub struct OrderSeedInfo {
    pub order_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
