//! Two-pool inventory ledger.
//!
//! Every (material, location) pair has one record with an `available` pool and
//! an `assigned` pool. Assigned stock is broken down into per-(project, site)
//! assignments whose quantities always sum to the record's `assigned` pool.
//! Each mutation runs in one transaction, locks the record, applies a
//! version-guarded update and appends exactly one movement.

use crate::{
    db::{self, DbPool},
    entities::{
        inventory_assignment::{self, Entity as InventoryAssignment},
        inventory_movement::{self, Entity as InventoryMovement, MovementKind},
        inventory_record::{self, Entity as InventoryRecord},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    money::{ensure_positive, round_quantity},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectSite {
    pub project_id: Uuid,
    pub site_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockDestination {
    /// Free stock, lands in the available pool
    General,
    /// Lands in the assigned pool under an assignment for the project
    Project(ProjectSite),
}

/// Originating document of a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub reference_type: String,
    pub reference_id: Uuid,
}

impl DocumentRef {
    pub fn new(reference_type: &str, reference_id: Uuid) -> Self {
        Self {
            reference_type: reference_type.to_string(),
            reference_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub material_id: Uuid,
    pub location_id: Uuid,
    pub quantity: Decimal,
    pub destination: StockDestination,
    pub reference: Option<DocumentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitStock {
    pub material_id: Uuid,
    pub location_id: Uuid,
    pub quantity: Decimal,
    pub target: ProjectSite,
    pub reference: Option<DocumentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStock {
    pub material_id: Uuid,
    pub location_id: Uuid,
    /// Signed change to the available pool
    pub delta: Decimal,
    pub justification: String,
}

/// Result of a ledger operation.
#[derive(Debug, Clone, Serialize)]
pub struct StockChange {
    pub record: inventory_record::Model,
    pub movement: inventory_movement::Model,
    /// Assignment touched by the operation, `None` when it was emptied
    pub assignment: Option<inventory_assignment::Model>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AssignmentChange {
    pub at: ProjectSite,
    pub delta: Decimal,
}

/// How a pool that would drop below zero is reported.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NegativeGuard {
    Insufficient,
    Reversal(Uuid),
}

impl NegativeGuard {
    fn breach(
        self,
        material_id: Uuid,
        location_id: Uuid,
        pool: &str,
        current: Decimal,
        requested: Decimal,
    ) -> ServiceError {
        match self {
            NegativeGuard::Insufficient => ServiceError::InsufficientStock {
                material_id,
                location_id,
                available: current,
                requested,
            },
            NegativeGuard::Reversal(movement_id) => ServiceError::WouldGoNegative {
                movement_id,
                detail: format!("{} ({} on hand, {} removed)", pool, current, requested),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Posting {
    pub kind: MovementKind,
    pub material_id: Uuid,
    pub location_id: Uuid,
    pub quantity: Decimal,
    pub available_delta: Decimal,
    pub assigned_delta: Decimal,
    pub assignment_changes: Vec<AssignmentChange>,
    pub project: Option<ProjectSite>,
    pub previous: Option<ProjectSite>,
    pub value_delta: Option<Decimal>,
    pub currency: Option<String>,
    pub reference: Option<DocumentRef>,
    pub justification: Option<String>,
    pub reverses_movement_id: Option<Uuid>,
}

impl Posting {
    fn new(kind: MovementKind, material_id: Uuid, location_id: Uuid, quantity: Decimal) -> Self {
        Self {
            kind,
            material_id,
            location_id,
            quantity,
            available_delta: Decimal::ZERO,
            assigned_delta: Decimal::ZERO,
            assignment_changes: Vec::new(),
            project: None,
            previous: None,
            value_delta: None,
            currency: None,
            reference: None,
            justification: None,
            reverses_movement_id: None,
        }
    }

    pub(crate) fn receipt(input: &ReceiveStock) -> Self {
        let quantity = round_quantity(input.quantity);
        let mut posting = Self::new(
            MovementKind::Receipt,
            input.material_id,
            input.location_id,
            quantity,
        );
        match input.destination {
            StockDestination::General => posting.available_delta = quantity,
            StockDestination::Project(at) => {
                posting.assigned_delta = quantity;
                posting.assignment_changes.push(AssignmentChange { at, delta: quantity });
                posting.project = Some(at);
            }
        }
        posting.reference = input.reference.clone();
        posting
    }

    /// Monetary delta only; pools are left untouched.
    pub(crate) fn valuation(
        material_id: Uuid,
        location_id: Uuid,
        value_delta: Decimal,
        currency: &str,
        reference: DocumentRef,
    ) -> Self {
        let mut posting = Self::new(
            MovementKind::ValuationAdjustment,
            material_id,
            location_id,
            Decimal::ZERO,
        );
        posting.value_delta = Some(value_delta);
        posting.currency = Some(currency.to_string());
        posting.reference = Some(reference);
        posting
    }

    /// Exact inverse of `movement`.
    fn reversal(movement: &inventory_movement::Model, reason: String) -> Self {
        let mut posting = Self::new(
            MovementKind::Reversal,
            movement.material_id,
            movement.location_id,
            -movement.quantity,
        );
        posting.available_delta = -movement.available_delta();
        posting.assigned_delta = -movement.assigned_delta();

        let project = project_of(movement.project_id, movement.site_id);
        let previous = project_of(movement.previous_project_id, movement.previous_site_id);

        match (movement.kind, project, previous) {
            (MovementKind::Transfer, Some(target), Some(source)) => {
                posting.assignment_changes = vec![
                    AssignmentChange {
                        at: target,
                        delta: -movement.quantity,
                    },
                    AssignmentChange {
                        at: source,
                        delta: movement.quantity,
                    },
                ];
                posting.project = Some(source);
                posting.previous = Some(target);
            }
            (_, Some(at), _) if !posting.assigned_delta.is_zero() => {
                posting.assignment_changes = vec![AssignmentChange {
                    at,
                    delta: posting.assigned_delta,
                }];
                posting.project = Some(at);
            }
            (_, project, _) => posting.project = project,
        }

        posting.value_delta = movement.value_delta.map(|v| -v);
        posting.currency = movement.currency.clone();
        posting.reference = movement
            .reference_id
            .zip(movement.reference_type.clone())
            .map(|(reference_id, reference_type)| DocumentRef {
                reference_type,
                reference_id,
            });
        posting.justification = Some(reason);
        posting.reverses_movement_id = Some(movement.id);
        posting
    }
}

fn project_of(project_id: Option<Uuid>, site_id: Option<Uuid>) -> Option<ProjectSite> {
    project_id
        .zip(site_id)
        .map(|(project_id, site_id)| ProjectSite {
            project_id,
            site_id,
        })
}

/// Loads the record for update, creating an empty one on first use.
async fn lock_or_create_record<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
    location_id: Uuid,
) -> Result<inventory_record::Model, ServiceError> {
    let existing = InventoryRecord::find()
        .filter(inventory_record::Column::MaterialId.eq(material_id))
        .filter(inventory_record::Column::LocationId.eq(location_id))
        .lock_exclusive()
        .one(conn)
        .await?;
    if let Some(record) = existing {
        return Ok(record);
    }

    let now = Utc::now();
    inventory_record::ActiveModel {
        id: Set(Uuid::new_v4()),
        material_id: Set(material_id),
        location_id: Set(location_id),
        available: Set(Decimal::ZERO),
        assigned: Set(Decimal::ZERO),
        version: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(db::conflict_or_db(material_id))
}

/// Applies one change to the (project, site) assignment of a record.
///
/// Returns the id of the assignment and its new state (`None` once emptied).
async fn apply_assignment_change<C: ConnectionTrait>(
    conn: &C,
    record: &inventory_record::Model,
    change: AssignmentChange,
    guard: NegativeGuard,
) -> Result<(Uuid, Option<inventory_assignment::Model>), ServiceError> {
    let existing = InventoryAssignment::find()
        .filter(inventory_assignment::Column::InventoryRecordId.eq(record.id))
        .filter(inventory_assignment::Column::ProjectId.eq(change.at.project_id))
        .filter(inventory_assignment::Column::SiteId.eq(change.at.site_id))
        .lock_exclusive()
        .one(conn)
        .await?;

    let current = existing.as_ref().map(|a| a.quantity).unwrap_or(Decimal::ZERO);
    let quantity = current + change.delta;
    if quantity < Decimal::ZERO {
        return Err(guard.breach(
            record.material_id,
            record.location_id,
            "assignment",
            current,
            -change.delta,
        ));
    }

    let now = Utc::now();
    match existing {
        Some(assignment) if quantity.is_zero() => {
            let id = assignment.id;
            assignment.delete(conn).await?;
            Ok((id, None))
        }
        Some(assignment) => {
            let id = assignment.id;
            let mut active: inventory_assignment::ActiveModel = assignment.into();
            active.quantity = Set(quantity);
            active.updated_at = Set(now);
            Ok((id, Some(active.update(conn).await?)))
        }
        None if quantity.is_zero() => Ok((Uuid::nil(), None)),
        None => {
            let created = inventory_assignment::ActiveModel {
                id: Set(Uuid::new_v4()),
                inventory_record_id: Set(record.id),
                material_id: Set(record.material_id),
                location_id: Set(record.location_id),
                project_id: Set(change.at.project_id),
                site_id: Set(change.at.site_id),
                quantity: Set(quantity),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await
            .map_err(db::conflict_or_db(record.id))?;
            Ok((created.id, Some(created)))
        }
    }
}

/// Applies a posting to the ledger inside the caller's transaction.
pub(crate) async fn post<C: ConnectionTrait>(
    conn: &C,
    posting: Posting,
    guard: NegativeGuard,
) -> Result<StockChange, ServiceError> {
    let assignment_total: Decimal = posting.assignment_changes.iter().map(|c| c.delta).sum();
    if assignment_total != posting.assigned_delta {
        return Err(ServiceError::InternalError(format!(
            "assignment changes ({}) do not match assigned delta ({})",
            assignment_total, posting.assigned_delta
        )));
    }

    let record = lock_or_create_record(conn, posting.material_id, posting.location_id).await?;

    let available = record.available + posting.available_delta;
    if available < Decimal::ZERO {
        return Err(guard.breach(
            record.material_id,
            record.location_id,
            "available",
            record.available,
            -posting.available_delta,
        ));
    }
    let assigned = record.assigned + posting.assigned_delta;
    if assigned < Decimal::ZERO {
        return Err(guard.breach(
            record.material_id,
            record.location_id,
            "assigned",
            record.assigned,
            -posting.assigned_delta,
        ));
    }

    let mut touched = Vec::with_capacity(posting.assignment_changes.len());
    for change in &posting.assignment_changes {
        touched.push(apply_assignment_change(conn, &record, *change, guard).await?);
    }

    let before = record.clone();
    let version = record.version;
    let mut active: inventory_record::ActiveModel = record.into();
    active.available = Set(available);
    active.assigned = Set(assigned);
    active.version = Set(version + 1);
    active.updated_at = Set(Utc::now());
    let record = InventoryRecord::update(active)
        .filter(inventory_record::Column::Version.eq(version))
        .exec(conn)
        .await
        .map_err(db::conflict_or_db(before.id))?;

    let assignment_id = touched.first().map(|(id, _)| *id);
    let counterpart_assignment_id = touched.get(1).map(|(id, _)| *id);
    let assignment = touched.into_iter().last().and_then(|(_, model)| model);

    let reverses_movement_id = posting.reverses_movement_id;
    let movement = inventory_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        kind: Set(posting.kind),
        inventory_record_id: Set(record.id),
        material_id: Set(record.material_id),
        location_id: Set(record.location_id),
        quantity: Set(posting.quantity),
        available_before: Set(before.available),
        available_after: Set(record.available),
        assigned_before: Set(before.assigned),
        assigned_after: Set(record.assigned),
        value_delta: Set(posting.value_delta),
        currency: Set(posting.currency),
        assignment_id: Set(assignment_id),
        counterpart_assignment_id: Set(counterpart_assignment_id),
        project_id: Set(posting.project.map(|p| p.project_id)),
        site_id: Set(posting.project.map(|p| p.site_id)),
        previous_project_id: Set(posting.previous.map(|p| p.project_id)),
        previous_site_id: Set(posting.previous.map(|p| p.site_id)),
        reference_type: Set(posting.reference.as_ref().map(|r| r.reference_type.clone())),
        reference_id: Set(posting.reference.as_ref().map(|r| r.reference_id)),
        justification: Set(posting.justification),
        reverses_movement_id: Set(reverses_movement_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(|e| match reverses_movement_id {
        Some(original) if db::is_unique_violation(&e) => ServiceError::AlreadyReversed(original),
        _ => ServiceError::db_error(e),
    })?;

    counter!("procura_inventory.movements", 1, "kind" => movement.kind.to_string());

    Ok(StockChange {
        record,
        movement,
        assignment,
    })
}

/// Inventory ledger operations.
#[derive(Clone)]
pub struct InventoryLedgerService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl InventoryLedgerService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    async fn apply(
        &self,
        posting: Posting,
        guard: NegativeGuard,
    ) -> Result<StockChange, ServiceError> {
        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;
        let change = post(&txn, posting, guard).await?;
        db::commit_transaction(txn, started).await?;

        info!(
            movement_id = %change.movement.id,
            kind = %change.movement.kind,
            material_id = %change.record.material_id,
            location_id = %change.record.location_id,
            available = %change.record.available,
            assigned = %change.record.assigned,
            "Inventory movement posted"
        );
        self.publish(&change.movement);
        Ok(change)
    }

    fn publish(&self, movement: &inventory_movement::Model) {
        self.event_sender
            .publish(Event::InventoryMovementPosted {
                movement_id: movement.id,
                kind: movement.kind,
                material_id: movement.material_id,
                location_id: movement.location_id,
            });
    }

    /// Inbound stock, either free or committed to a project on arrival.
    #[instrument(skip(self))]
    pub async fn receive(&self, input: ReceiveStock) -> Result<StockChange, ServiceError> {
        ensure_positive(round_quantity(input.quantity), "quantity")?;
        self.apply(Posting::receipt(&input), NegativeGuard::Insufficient)
            .await
    }

    /// Moves available stock into the target project's assignment.
    #[instrument(skip(self))]
    pub async fn commit_stock(&self, input: CommitStock) -> Result<StockChange, ServiceError> {
        let quantity = round_quantity(input.quantity);
        ensure_positive(quantity, "quantity")?;

        let mut posting = Posting::new(
            MovementKind::Assignment,
            input.material_id,
            input.location_id,
            quantity,
        );
        posting.available_delta = -quantity;
        posting.assigned_delta = quantity;
        posting.assignment_changes = vec![AssignmentChange {
            at: input.target,
            delta: quantity,
        }];
        posting.project = Some(input.target);
        posting.reference = input.reference;

        self.apply(posting, NegativeGuard::Insufficient).await
    }

    /// Returns committed stock from an assignment to the available pool.
    #[instrument(skip(self))]
    pub async fn release_stock(
        &self,
        assignment_id: Uuid,
        quantity: Decimal,
    ) -> Result<StockChange, ServiceError> {
        let quantity = round_quantity(quantity);
        ensure_positive(quantity, "quantity")?;
        let assignment = self.get_assignment(assignment_id).await?;
        let at = assignment_site(&assignment);

        let mut posting = Posting::new(
            MovementKind::Release,
            assignment.material_id,
            assignment.location_id,
            quantity,
        );
        posting.available_delta = quantity;
        posting.assigned_delta = -quantity;
        posting.assignment_changes = vec![AssignmentChange {
            at,
            delta: -quantity,
        }];
        posting.project = Some(at);

        self.apply(posting, NegativeGuard::Insufficient).await
    }

    /// Moves all of an assignment, or `quantity` of it, to another project/site.
    /// Pool totals are unchanged.
    #[instrument(skip(self))]
    pub async fn transfer_assignment(
        &self,
        assignment_id: Uuid,
        quantity: Option<Decimal>,
        target: ProjectSite,
    ) -> Result<StockChange, ServiceError> {
        let assignment = self.get_assignment(assignment_id).await?;
        let source = assignment_site(&assignment);
        if source == target {
            return Err(ServiceError::ValidationError(
                "transfer target matches the current project and site".to_string(),
            ));
        }

        let quantity = round_quantity(quantity.unwrap_or(assignment.quantity));
        ensure_positive(quantity, "quantity")?;

        let mut posting = Posting::new(
            MovementKind::Transfer,
            assignment.material_id,
            assignment.location_id,
            quantity,
        );
        posting.assignment_changes = vec![
            AssignmentChange {
                at: source,
                delta: -quantity,
            },
            AssignmentChange {
                at: target,
                delta: quantity,
            },
        ];
        posting.project = Some(target);
        posting.previous = Some(source);

        self.apply(posting, NegativeGuard::Insufficient).await
    }

    /// Issues committed stock out of the ledger.
    #[instrument(skip(self))]
    pub async fn consume(
        &self,
        assignment_id: Uuid,
        quantity: Decimal,
        reference: Option<DocumentRef>,
    ) -> Result<StockChange, ServiceError> {
        let quantity = round_quantity(quantity);
        ensure_positive(quantity, "quantity")?;
        let assignment = self.get_assignment(assignment_id).await?;
        let at = assignment_site(&assignment);

        let mut posting = Posting::new(
            MovementKind::Consumption,
            assignment.material_id,
            assignment.location_id,
            quantity,
        );
        posting.assigned_delta = -quantity;
        posting.assignment_changes = vec![AssignmentChange {
            at,
            delta: -quantity,
        }];
        posting.project = Some(at);
        posting.reference = reference;

        self.apply(posting, NegativeGuard::Insufficient).await
    }

    /// Manual correction of the available pool. A justification is mandatory.
    #[instrument(skip(self))]
    pub async fn adjust_stock(&self, input: AdjustStock) -> Result<StockChange, ServiceError> {
        let delta = round_quantity(input.delta);
        if delta.is_zero() {
            return Err(ServiceError::ValidationError(
                "adjustment delta must not be zero".to_string(),
            ));
        }
        let justification = input.justification.trim();
        if justification.is_empty() {
            return Err(ServiceError::ValidationError(
                "stock adjustments require a justification".to_string(),
            ));
        }

        let mut posting = Posting::new(
            MovementKind::Adjustment,
            input.material_id,
            input.location_id,
            delta,
        );
        posting.available_delta = delta;
        posting.justification = Some(justification.to_string());

        self.apply(posting, NegativeGuard::Insufficient).await
    }

    /// Posts the exact inverse of a movement. A movement is reversed at most once.
    #[instrument(skip(self))]
    pub async fn reverse_movement(
        &self,
        movement_id: Uuid,
        reason: String,
    ) -> Result<inventory_movement::Model, ServiceError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "a reversal requires a reason".to_string(),
            ));
        }

        let started = Instant::now();
        let txn = db::begin_transaction(&self.db_pool).await?;

        let original = InventoryMovement::find_by_id(movement_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Inventory movement", movement_id))?;

        if original.kind == MovementKind::Reversal {
            return Err(ServiceError::ValidationError(format!(
                "movement {} is itself a reversal",
                movement_id
            )));
        }

        let existing = InventoryMovement::find()
            .filter(inventory_movement::Column::ReversesMovementId.eq(movement_id))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::AlreadyReversed(movement_id));
        }

        let change = post(
            &txn,
            Posting::reversal(&original, reason),
            NegativeGuard::Reversal(movement_id),
        )
        .await?;
        db::commit_transaction(txn, started).await?;

        warn!(
            movement_id = %movement_id,
            reversal_id = %change.movement.id,
            "Inventory movement reversed"
        );
        self.publish(&change.movement);
        Ok(change.movement)
    }

    #[instrument(skip(self))]
    pub async fn get_record(&self, record_id: Uuid) -> Result<inventory_record::Model, ServiceError> {
        InventoryRecord::find_by_id(record_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Inventory record", record_id))
    }

    #[instrument(skip(self))]
    pub async fn find_record(
        &self,
        material_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<inventory_record::Model>, ServiceError> {
        Ok(InventoryRecord::find()
            .filter(inventory_record::Column::MaterialId.eq(material_id))
            .filter(inventory_record::Column::LocationId.eq(location_id))
            .one(&*self.db_pool)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<inventory_assignment::Model, ServiceError> {
        InventoryAssignment::find_by_id(assignment_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Inventory assignment", assignment_id))
    }

    #[instrument(skip(self))]
    pub async fn list_assignments(
        &self,
        material_id: Uuid,
        location_id: Uuid,
    ) -> Result<Vec<inventory_assignment::Model>, ServiceError> {
        Ok(InventoryAssignment::find()
            .filter(inventory_assignment::Column::MaterialId.eq(material_id))
            .filter(inventory_assignment::Column::LocationId.eq(location_id))
            .order_by_asc(inventory_assignment::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    /// Movements of a material at a location, oldest first.
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        material_id: Uuid,
        location_id: Uuid,
    ) -> Result<Vec<inventory_movement::Model>, ServiceError> {
        Ok(InventoryMovement::find()
            .filter(inventory_movement::Column::MaterialId.eq(material_id))
            .filter(inventory_movement::Column::LocationId.eq(location_id))
            .order_by_asc(inventory_movement::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }
}

fn assignment_site(assignment: &inventory_assignment::Model) -> ProjectSite {
    ProjectSite {
        project_id: assignment.project_id,
        site_id: assignment.site_id,
    }
}
