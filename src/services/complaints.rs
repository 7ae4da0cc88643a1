use crate::{
    db::DbPool,
    entities::{
        complaint::{self, ComplaintDecision},
        order::{self, OrderStatus},
        service_order_detail::{self, ServiceStatus},
        transaction_history::TransactionType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        orders::{pay_out, settled_detail, transition_order, DetailKind},
        Actor,
    },
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct FileComplaintRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 2000, message = "Message must be 1-2000 characters"))]
    pub message: String,
    #[validate(url(message = "Evidence must be a valid URL"))]
    pub evidence_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResolveComplaintRequest {
    pub decision: ComplaintDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComplaintView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub complainant_id: Uuid,
    pub message: String,
    pub evidence_url: Option<String>,
    pub resolved: bool,
    pub decision: Option<String>,
    pub admin_id: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<complaint::Model> for ComplaintView {
    fn from(c: complaint::Model) -> Self {
        Self {
            id: c.id,
            order_id: c.order_id,
            complainant_id: c.complainant_id,
            message: c.message,
            evidence_url: c.evidence_url,
            resolved: c.resolved,
            decision: c.decision,
            admin_id: c.admin_id,
            resolved_at: c.resolved_at,
            created_at: c.created_at,
        }
    }
}

#[derive(Clone)]
pub struct ComplaintService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ComplaintService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Opens a dispute on an order. Either party may file; the order is
    /// frozen in `complained` until an admin rules.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn file_complaint(
        &self,
        actor: &Actor,
        request: FileComplaintRequest,
    ) -> Result<ComplaintView, ServiceError> {
        request.validate()?;
        let txn = self.db_pool.begin().await?;

        let found = order::Entity::find_by_id(request.order_id)
            .one(&txn)
            .await?
            .filter(|o| o.active)
            .ok_or_else(|| ServiceError::not_found("Order", request.order_id))?;

        let is_buyer = found.buyer_id == actor.user_id;
        let is_seller = settled_detail(&txn, found.id)
            .await?
            .map(|d| d.seller_id == actor.user_id)
            .unwrap_or(false);
        if !is_buyer && !is_seller {
            return Err(ServiceError::Forbidden(
                "You are not a party to this order".to_string(),
            ));
        }

        let open = complaint::Entity::find()
            .filter(complaint::Column::OrderId.eq(found.id))
            .filter(complaint::Column::Resolved.eq(false))
            .one(&txn)
            .await?;
        if open.is_some() {
            return Err(ServiceError::Conflict(
                "Order already has an open complaint".to_string(),
            ));
        }

        let complainable = [OrderStatus::Processing, OrderStatus::Delivered];
        let moved = transition_order(
            &txn,
            found.id,
            &complainable,
            OrderStatus::Complained,
            false,
        )
        .await?;
        if !moved {
            return Err(ServiceError::Conflict(format!(
                "Order in status '{}' cannot be disputed",
                found.status
            )));
        }

        let created = complaint::ActiveModel {
            order_id: Set(found.id),
            complainant_id: Set(actor.user_id),
            message: Set(request.message),
            evidence_url: Set(request.evidence_url),
            resolved: Set(false),
            decision: Set(None),
            admin_id: Set(None),
            resolved_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(complaint_id = %created.id, order_id = %found.id, "Complaint filed");
        self.event_sender
            .send_or_log(Event::ComplaintFiled {
                complaint_id: created.id,
                order_id: found.id,
            })
            .await;
        Ok(created.into())
    }

    pub async fn list_order_complaints(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<Vec<ComplaintView>, ServiceError> {
        let db = &*self.db_pool;
        let found = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

        if !actor.is_admin() && found.buyer_id != actor.user_id {
            let seller = settled_detail(db, order_id).await?.map(|d| d.seller_id);
            if seller != Some(actor.user_id) {
                return Err(ServiceError::not_found("Order", order_id));
            }
        }

        Ok(complaint::Entity::find()
            .filter(complaint::Column::OrderId.eq(order_id))
            .order_by_desc(complaint::Column::CreatedAt)
            .all(db)
            .await?
            .into_iter()
            .map(ComplaintView::from)
            .collect())
    }

    /// Admin ruling. `refund` returns the paid total to the buyer, `release`
    /// pays the seller, `negotiate` records the ruling and leaves the
    /// complaint open.
    #[instrument(skip(self))]
    pub async fn resolve_complaint(
        &self,
        admin: &Actor,
        complaint_id: Uuid,
        decision: ComplaintDecision,
    ) -> Result<ComplaintView, ServiceError> {
        if !admin.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only admins can resolve complaints".to_string(),
            ));
        }

        let txn = self.db_pool.begin().await?;
        let found = complaint::Entity::find_by_id(complaint_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Complaint", complaint_id))?;
        if found.resolved {
            return Err(ServiceError::Conflict(
                "Complaint has already been resolved".to_string(),
            ));
        }

        let disputed = order::Entity::find_by_id(found.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", found.order_id))?;

        let now = Utc::now();
        let closes = decision != ComplaintDecision::Negotiate;
        let mut update = complaint::Entity::update_many()
            .col_expr(
                complaint::Column::Decision,
                Expr::value(Some(decision.as_str().to_string())),
            )
            .col_expr(complaint::Column::AdminId, Expr::value(Some(admin.user_id)))
            .col_expr(complaint::Column::UpdatedAt, Expr::value(now));
        if closes {
            update = update
                .col_expr(complaint::Column::Resolved, Expr::value(true))
                .col_expr(complaint::Column::ResolvedAt, Expr::value(Some(now)));
        }
        let result = update
            .filter(complaint::Column::Id.eq(complaint_id))
            .filter(complaint::Column::Resolved.eq(false))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Complaint has already been resolved".to_string(),
            ));
        }

        if closes {
            let (to, released) = match decision {
                ComplaintDecision::Refund => (OrderStatus::Refunded, false),
                _ => (OrderStatus::Completed, true),
            };
            let moved =
                transition_order(&txn, disputed.id, &[OrderStatus::Complained], to, released)
                    .await?;
            if !moved {
                return Err(ServiceError::Conflict(format!(
                    "Order {} is no longer under dispute",
                    disputed.order_code
                )));
            }

            let detail = settled_detail(&txn, disputed.id).await?;
            if let Some(detail) = detail.filter(|_| disputed.is_paid) {
                match decision {
                    ComplaintDecision::Refund => {
                        if detail.kind == DetailKind::Service
                            && !matches!(
                                detail.service_status,
                                Some(ServiceStatus::Completed) | Some(ServiceStatus::Failed)
                            )
                        {
                            service_order_detail::Entity::update_many()
                                .col_expr(
                                    service_order_detail::Column::Status,
                                    Expr::value(ServiceStatus::Failed.as_str()),
                                )
                                .col_expr(
                                    service_order_detail::Column::UpdatedAt,
                                    Expr::value(now),
                                )
                                .filter(service_order_detail::Column::Id.eq(detail.detail_id))
                                .exec(&txn)
                                .await?;
                        }
                        pay_out(
                            &txn,
                            disputed.buyer_id,
                            TransactionType::Refund,
                            detail.total_amount,
                            format!("Refund for disputed order {}", disputed.order_code),
                            disputed.id,
                        )
                        .await?;
                    }
                    _ => {
                        pay_out(
                            &txn,
                            detail.seller_id,
                            TransactionType::Receive,
                            detail.total_amount,
                            format!("Payment released for order {}", disputed.order_code),
                            disputed.id,
                        )
                        .await?;
                    }
                }
            }
        }

        let updated = complaint::Entity::find_by_id(complaint_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Complaint", complaint_id))?;
        txn.commit().await?;

        info!(
            complaint_id = %complaint_id,
            order_id = %disputed.id,
            decision = %decision,
            "Complaint ruled"
        );
        self.event_sender
            .send_or_log(Event::ComplaintResolved {
                complaint_id,
                order_id: disputed.id,
                decision: decision.as_str().to_string(),
            })
            .await;
        Ok(updated.into())
    }
}
