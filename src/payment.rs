use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";

/// A locally tracked payment. Only `status` and `updated_at` change after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub payer_id: String,
    pub payment_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Payment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Payment {}>", self.payment_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payer_id: String,
    pub payment_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub email: String,
}

impl NewPayment {
    pub fn into_payment(self, id: i64, now: DateTime<Utc>) -> Payment {
        Payment {
            id,
            payer_id: self.payer_id,
            payment_id: self.payment_id,
            amount: self.amount,
            currency: self.currency,
            status: self.status,
            email: self.email,
            created_at: now,
            updated_at: now,
        }
    }
}
