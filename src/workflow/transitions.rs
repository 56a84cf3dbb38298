/*!
 * # Status Transition Graph
 *
 * The authoritative table of legal purchase-order status moves. Each edge
 * carries a guard evaluated against the order contents. All status changes in
 * the crate are checked against this table, and multi-hop changes (approving
 * straight from draft, receiving straight from approved) are routed through
 * it so every hop is recorded.
 */

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::models::{PurchaseOrder, PurchaseOrderStatus};

/// Condition that must hold on the order for an edge to be taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransitionGuard {
    None,
    /// The order has at least one line.
    RequiresItems,
    /// The order is approvable: it has lines and its totals add up. The
    /// amount ceiling itself is enforced by the permission gate.
    ApprovalAuthority,
    SomeReceived,
    AllReceived,
    NothingReceived,
}

impl TransitionGuard {
    pub fn is_satisfied(self, order: &PurchaseOrder) -> bool {
        match self {
            TransitionGuard::None => true,
            TransitionGuard::RequiresItems => !order.items.is_empty(),
            TransitionGuard::ApprovalAuthority => {
                !order.items.is_empty() && order.totals_consistent()
            }
            TransitionGuard::SomeReceived => order.has_receipts(),
            TransitionGuard::AllReceived => order.all_received(),
            TransitionGuard::NothingReceived => !order.has_receipts(),
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            TransitionGuard::None => "no condition",
            TransitionGuard::RequiresItems => "the order must contain at least one item",
            TransitionGuard::ApprovalAuthority => {
                "the order must contain items and consistent totals"
            }
            TransitionGuard::SomeReceived => "some goods must have been received",
            TransitionGuard::AllReceived => "every item must be fully received",
            TransitionGuard::NothingReceived => "no goods may have been received",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionEdge {
    pub from: PurchaseOrderStatus,
    pub to: PurchaseOrderStatus,
    pub guard: TransitionGuard,
}

lazy_static! {
    static ref EDGES: Vec<TransitionEdge> = {
        use PurchaseOrderStatus::*;
        use TransitionGuard as G;

        let edge = |from, to, guard| TransitionEdge { from, to, guard };
        vec![
            edge(Draft, PendingApproval, G::RequiresItems),
            edge(Draft, Cancelled, G::None),
            edge(PendingApproval, Approved, G::ApprovalAuthority),
            edge(PendingApproval, Draft, G::None),
            edge(PendingApproval, Cancelled, G::None),
            edge(Approved, SentToSupplier, G::None),
            edge(Approved, PartiallyReceived, G::SomeReceived),
            edge(Approved, Cancelled, G::NothingReceived),
            edge(SentToSupplier, PartiallyReceived, G::SomeReceived),
            edge(SentToSupplier, FullyReceived, G::AllReceived),
            edge(SentToSupplier, Cancelled, G::NothingReceived),
            edge(PartiallyReceived, FullyReceived, G::AllReceived),
            edge(FullyReceived, Closed, G::None),
        ]
    };
}

/// Stateless view over the edge table.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransitionGraph;

impl TransitionGraph {
    pub fn edges(&self) -> &'static [TransitionEdge] {
        EDGES.as_slice()
    }

    pub fn edge(
        &self,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
    ) -> Option<&'static TransitionEdge> {
        EDGES.iter().find(|edge| edge.from == from && edge.to == to)
    }

    pub fn valid_transitions(&self, status: PurchaseOrderStatus) -> BTreeSet<PurchaseOrderStatus> {
        EDGES
            .iter()
            .filter(|edge| edge.from == status)
            .map(|edge| edge.to)
            .collect()
    }

    pub fn is_valid_transition(&self, from: PurchaseOrderStatus, to: PurchaseOrderStatus) -> bool {
        self.edge(from, to).is_some()
    }

    /// Whether the edge exists and its guard holds for `order` as it stands.
    pub fn guard_satisfied(
        &self,
        order: &PurchaseOrder,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
    ) -> bool {
        self.edge(from, to)
            .map(|edge| edge.guard.is_satisfied(order))
            .unwrap_or(false)
    }

    /// Suggested status from aggregate received vs. ordered quantities.
    ///
    /// `received_by_product` overrides the order's own received counts. Returns
    /// `None` for terminal statuses.
    pub fn next_logical_status(
        &self,
        order: &PurchaseOrder,
        received_by_product: Option<&HashMap<Uuid, i32>>,
    ) -> Option<PurchaseOrderStatus> {
        if order.status.is_terminal() {
            return None;
        }
        if order.items.is_empty() {
            return Some(order.status);
        }

        let mut ordered: HashMap<Uuid, i64> = HashMap::new();
        for item in &order.items {
            *ordered.entry(item.product_id).or_insert(0) += i64::from(item.quantity);
        }
        let received: HashMap<Uuid, i64> = match received_by_product {
            Some(overrides) => overrides
                .iter()
                .map(|(product, qty)| (*product, i64::from(*qty)))
                .collect(),
            None => order
                .received_by_product()
                .into_iter()
                .map(|(product, qty)| (product, i64::from(qty)))
                .collect(),
        };

        let received_of = |product: &Uuid| received.get(product).copied().unwrap_or(0);
        let complete = ordered
            .iter()
            .all(|(product, qty)| received_of(product) >= *qty);
        let any = ordered.keys().any(|product| received_of(product) > 0);

        Some(if complete {
            PurchaseOrderStatus::FullyReceived
        } else if any {
            PurchaseOrderStatus::PartiallyReceived
        } else {
            order.status
        })
    }

    /// Shortest legal path from `from` to `to`, excluding `from`. Empty when
    /// the two are equal.
    pub fn route(
        &self,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
    ) -> Option<Vec<PurchaseOrderStatus>> {
        self.route_where(from, to, |_| true)
    }

    /// Path used by receiving: only edges into receiving statuses are taken,
    /// so `approved` reaches `fully_received` via `partially_received` rather
    /// than by way of `sent_to_supplier`.
    pub fn receiving_route(
        &self,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
    ) -> Option<Vec<PurchaseOrderStatus>> {
        self.route_where(from, to, |edge| {
            matches!(
                edge.to,
                PurchaseOrderStatus::PartiallyReceived | PurchaseOrderStatus::FullyReceived
            )
        })
    }

    fn route_where<F>(
        &self,
        from: PurchaseOrderStatus,
        to: PurchaseOrderStatus,
        allow: F,
    ) -> Option<Vec<PurchaseOrderStatus>>
    where
        F: Fn(&TransitionEdge) -> bool,
    {
        if from == to {
            return Some(Vec::new());
        }

        let mut previous: HashMap<PurchaseOrderStatus, PurchaseOrderStatus> = HashMap::new();
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            for edge in EDGES.iter().filter(|edge| edge.from == current && allow(edge)) {
                if !seen.insert(edge.to) {
                    continue;
                }
                previous.insert(edge.to, current);
                if edge.to == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(&prior) = previous.get(&cursor) {
                        if prior == from {
                            break;
                        }
                        path.push(prior);
                        cursor = prior;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(edge.to);
            }
        }
        None
    }

    pub fn reachable_from_draft(&self, status: PurchaseOrderStatus) -> bool {
        self.route(PurchaseOrderStatus::Draft, status).is_some()
    }
}
