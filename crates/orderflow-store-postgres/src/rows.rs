//! Row shapes returned by `sqlx::query_as`, and their fallible conversion
//! into the domain types from `orderflow-types`.
//!
//! Enum columns are stored as the `Debug` spelling of the Rust variant
//! (`"PaymentPending"`, `"Card"`, ...) and parsed back by exact match; an
//! unrecognized value means the schema and this file have drifted, which
//! is a backend bug, not a domain error.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use orderflow_store_core::StoreError;
use orderflow_types::{
    Delivery, DeliveryStatus, LineItem, Order, OrderStatus, OutboxRecord, Payment, PaymentMethod,
    PaymentStatus, SagaState, SagaStatus, SagaStep,
};

fn bad_enum(column: &str, value: &str) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("unrecognized {column} value in database: {value}"))
}

fn parse_order_status(s: &str) -> Result<OrderStatus, StoreError> {
    Ok(match s {
        "Created" => OrderStatus::Created,
        "PaymentPending" => OrderStatus::PaymentPending,
        "Paid" => OrderStatus::Paid,
        "Preparing" => OrderStatus::Preparing,
        "Delivering" => OrderStatus::Delivering,
        "Delivered" => OrderStatus::Delivered,
        "Cancelled" => OrderStatus::Cancelled,
        other => return Err(bad_enum("orders.status", other)),
    })
}

fn parse_payment_method(s: &str) -> Result<PaymentMethod, StoreError> {
    Ok(match s {
        "Card" => PaymentMethod::Card,
        "Wallet" => PaymentMethod::Wallet,
        "Cash" => PaymentMethod::Cash,
        other => return Err(bad_enum("orders.payment_method", other)),
    })
}

fn parse_payment_status(s: &str) -> Result<PaymentStatus, StoreError> {
    Ok(match s {
        "Pending" => PaymentStatus::Pending,
        "Completed" => PaymentStatus::Completed,
        "Failed" => PaymentStatus::Failed,
        "Refunded" => PaymentStatus::Refunded,
        other => return Err(bad_enum("payments.status", other)),
    })
}

fn parse_delivery_status(s: &str) -> Result<DeliveryStatus, StoreError> {
    Ok(match s {
        "Waiting" => DeliveryStatus::Waiting,
        "RiderAssigned" => DeliveryStatus::RiderAssigned,
        "PickedUp" => DeliveryStatus::PickedUp,
        "Delivering" => DeliveryStatus::Delivering,
        "Delivered" => DeliveryStatus::Delivered,
        "Cancelled" => DeliveryStatus::Cancelled,
        other => return Err(bad_enum("deliveries.status", other)),
    })
}

fn parse_saga_status(s: &str) -> Result<SagaStatus, StoreError> {
    Ok(match s {
        "Started" => SagaStatus::Started,
        "Compensating" => SagaStatus::Compensating,
        "Completed" => SagaStatus::Completed,
        "Failed" => SagaStatus::Failed,
        other => return Err(bad_enum("sagas.status", other)),
    })
}

fn parse_saga_step(s: &str) -> Result<SagaStep, StoreError> {
    Ok(match s {
        "PaymentPending" => SagaStep::PaymentPending,
        "PaymentCompleted" => SagaStep::PaymentCompleted,
        "DeliveryPending" => SagaStep::DeliveryPending,
        "CompensatingPayment" => SagaStep::CompensatingPayment,
        "Completed" => SagaStep::Completed,
        "Failed" => SagaStep::Failed,
        other => return Err(bad_enum("sagas.step", other)),
    })
}

#[derive(FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub store_id: Uuid,
    pub items: serde_json::Value,
    pub total_cents: i64,
    pub status: String,
    pub delivery_address: String,
    pub payment_method: String,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let items: Vec<LineItem> = serde_json::from_value(row.items)
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            store_id: row.store_id,
            items,
            total_cents: row.total_cents,
            status: parse_order_status(&row.status)?,
            delivery_address: row.delivery_address,
            payment_method: parse_payment_method(&row.payment_method)?,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            version: row.version,
        })
    }
}

#[derive(FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
    pub status: String,
    pub idempotency_key: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            amount_cents: row.amount_cents,
            method: parse_payment_method(&row.method)?,
            status: parse_payment_status(&row.status)?,
            idempotency_key: row.idempotency_key,
            version: row.version,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
pub struct DeliveryRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: String,
    pub rider_id: Option<Uuid>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub last_fencing_token: Option<i64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for Delivery {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(Delivery {
            id: row.id,
            order_id: row.order_id,
            status: parse_delivery_status(&row.status)?,
            rider_id: row.rider_id,
            estimated_completion_at: row.estimated_completion_at,
            last_fencing_token: row.last_fencing_token.map(|t| t as u64),
            version: row.version,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
pub struct SagaRow {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub order_id: Uuid,
    pub status: String,
    pub step: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SagaRow> for SagaState {
    type Error = StoreError;

    fn try_from(row: SagaRow) -> Result<Self, Self::Error> {
        Ok(SagaState {
            saga_id: row.saga_id,
            saga_type: row.saga_type,
            order_id: row.order_id,
            status: parse_saga_status(&row.status)?,
            step: parse_saga_step(&row.step)?,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxRecord {
            id: row.id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            published: row.published,
            created_at: row.created_at,
            published_at: row.published_at,
        })
    }
}
