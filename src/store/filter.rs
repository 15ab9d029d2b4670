//! Filter-to-SQL translation.
//!
//! Produces the candidate selection shared by claim and find. Each filter
//! dimension becomes one conjunctive restriction, mirroring
//! [`Issue::can_be_claimed`](crate::model::Issue::can_be_claimed) exactly.

use sqlx::{QueryBuilder, Sqlite};

use crate::model::ClaimFilters;

/// Readiness: open and absent from the blocked cache.
const READY_FROM: &str = " FROM issues i \
     LEFT JOIN blocked_issues_cache b ON b.issue_id = i.id \
     WHERE i.status = 'open' AND b.issue_id IS NULL";

/// Priority descending, then oldest, then id. Total.
///
/// Creation times are compared as instants: stored layouts differ in
/// separator and offset, so their text order is not their time order.
/// Unparseable values give NULL and sort first, as the epoch does on read.
const CLAIM_ORDER: &str =
    " ORDER BY i.priority DESC, julianday(i.created_at) ASC, i.created_at ASC, i.id ASC";

/// Append `SELECT i.id ... LIMIT 1` choosing the single issue a claim with
/// `filters` would take.
pub(crate) fn push_candidate_id(qb: &mut QueryBuilder<'_, Sqlite>, filters: &ClaimFilters) {
    qb.push("SELECT i.id");
    qb.push(READY_FROM);
    push_filter_predicates(qb, filters);
    qb.push(CLAIM_ORDER);
    qb.push(" LIMIT 1");
}

/// Append one `AND ...` clause per active filter dimension.
pub(crate) fn push_filter_predicates(qb: &mut QueryBuilder<'_, Sqlite>, filters: &ClaimFilters) {
    if filters.only_unassigned {
        // Some writers store '' rather than NULL for "nobody"; both read
        // back as unassigned.
        qb.push(" AND (i.assignee IS NULL OR i.assignee = '')");
    }

    if let Some(min) = filters.min_priority {
        qb.push(" AND i.priority >= ");
        qb.push_bind(min.value());
    }

    for label in filters.include_labels.iter() {
        qb.push(" AND EXISTS (SELECT 1 FROM labels l WHERE l.issue_id = i.id AND l.label = ");
        qb.push_bind(label.to_string());
        qb.push(")");
    }

    for label in filters.exclude_labels.iter() {
        qb.push(" AND NOT EXISTS (SELECT 1 FROM labels l WHERE l.issue_id = i.id AND l.label = ");
        qb.push_bind(label.to_string());
        qb.push(")");
    }
}
