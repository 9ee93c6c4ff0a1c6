//! # Branch Ledger Locator Module
//!
//! Looks up a candidate folio across the per-branch sales databases. Branches
//! are probed in listed order over short-lived connections; the first branch
//! holding a matching document wins and the scan stops. Unreachable branches
//! are logged and skipped so a healthy branch later in the list still gets
//! its turn.
//!
//! Two guard rails protect the remote branch servers: a scan throttle that
//! enforces a minimum interval between connection attempts, and a circuit
//! breaker per branch that skips hosts which keep failing.

use chrono::NaiveDate;
use parking_lot::Mutex;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::circuit_breaker::CircuitBreaker;
use crate::errors::error_logging;
use crate::ocr_config::RecoveryConfig;

/// Branch type classification. The type picks the query shape used against
/// that branch's database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Supermercado,
    Supermerreteria,
    Ferreteria,
    Multitienda,
    Otro,
}

impl BranchKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "supermercado" => BranchKind::Supermercado,
            "supermerreteria" => BranchKind::Supermerreteria,
            "ferreteria" => BranchKind::Ferreteria,
            "multitienda" => BranchKind::Multitienda,
            _ => BranchKind::Otro,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BranchKind::Supermercado => "Supermercado",
            BranchKind::Supermerreteria => "Supermerreteria",
            BranchKind::Ferreteria => "Ferreteria",
            BranchKind::Multitienda => "Multitienda",
            BranchKind::Otro => "Otro",
        }
    }

    /// Query family for this branch type; `None` means the type is not
    /// recognized and the branch is skipped silently during a scan.
    fn query_family(&self) -> Option<QueryFamily> {
        match self {
            BranchKind::Supermercado | BranchKind::Supermerreteria => {
                Some(QueryFamily::Supermarket)
            }
            BranchKind::Ferreteria | BranchKind::Multitienda => Some(QueryFamily::Hardware),
            BranchKind::Otro => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryFamily {
    /// Unified sales-document header table filtered to boleta/factura codes
    Supermarket,
    /// Union of the boletas and client-invoice tables
    Hardware,
}

/// Sales document type found in a branch ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Boleta,
    Factura,
    VentaCigarros,
    Otro,
}

impl DocumentKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "boleta" => DocumentKind::Boleta,
            "factura" => DocumentKind::Factura,
            "venta_cigarros" | "ventacigarros" => DocumentKind::VentaCigarros,
            _ => DocumentKind::Otro,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Boleta => "Boleta",
            DocumentKind::Factura => "Factura",
            DocumentKind::VentaCigarros => "VentaCigarros",
            DocumentKind::Otro => "Otro",
        }
    }
}

/// A retail branch with (possibly) a configured ledger database
#[derive(Debug, Clone)]
pub struct BranchDescriptor {
    pub id: i64,
    pub name: String,
    pub kind: BranchKind,
    /// Connection URL for the branch database; branches without one are skipped
    pub db_url: Option<String>,
}

/// A sales document found in one branch's ledger
#[derive(Debug, Clone)]
pub struct LedgerDocument {
    pub folio: String,
    pub total_amount: i64,
    pub issue_date: NaiveDate,
    pub document_kind: DocumentKind,
}

/// Result of a full branch scan for one folio
#[derive(Debug, Clone)]
pub struct LedgerMatch {
    pub exists: bool,
    pub folio: Option<String>,
    pub total_amount: Option<i64>,
    pub issue_date: Option<NaiveDate>,
    pub document_kind: Option<DocumentKind>,
    pub branch_id: Option<i64>,
    pub branch_name: Option<String>,
    pub branch_kind: Option<BranchKind>,
    pub meets_minimum_amount: bool,
    pub meets_minimum_date: bool,
}

impl LedgerMatch {
    /// The no-branch-matched outcome: all derived flags false, fields empty
    pub fn not_found() -> Self {
        Self {
            exists: false,
            folio: None,
            total_amount: None,
            issue_date: None,
            document_kind: None,
            branch_id: None,
            branch_name: None,
            branch_kind: None,
            meets_minimum_amount: false,
            meets_minimum_date: false,
        }
    }

    /// Build a match from a found document, deriving the eligibility flags
    pub fn found(
        branch: &BranchDescriptor,
        document: &LedgerDocument,
        minimum_amount: i64,
        campaign_start: NaiveDate,
    ) -> Self {
        Self {
            exists: true,
            folio: Some(document.folio.clone()),
            total_amount: Some(document.total_amount),
            issue_date: Some(document.issue_date),
            document_kind: Some(document.document_kind),
            branch_id: Some(branch.id),
            branch_name: Some(branch.name.clone()),
            branch_kind: Some(branch.kind),
            meets_minimum_amount: document.total_amount >= minimum_amount,
            // Boundary inclusive: a document dated exactly on the campaign
            // start qualifies
            meets_minimum_date: document.issue_date >= campaign_start,
        }
    }
}

/// One branch-database lookup. The production implementation opens a
/// short-lived SQL connection; tests substitute a scripted probe.
pub trait BranchProbe {
    fn find_document(
        &self,
        branch: &BranchDescriptor,
        folio: &str,
        since: NaiveDate,
    ) -> impl std::future::Future<Output = anyhow::Result<Option<LedgerDocument>>> + Send;
}

/// Probe implementation against live branch databases
#[derive(Debug, Clone)]
pub struct SqlBranchProbe {
    connect_timeout: Duration,
    query_timeout: Duration,
}

impl SqlBranchProbe {
    pub fn new(connect_timeout: Duration, query_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            query_timeout,
        }
    }

    async fn query_branch(
        &self,
        connection: &mut PgConnection,
        family: QueryFamily,
        folio: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Option<LedgerDocument>> {
        let sql = match family {
            QueryFamily::Supermarket => {
                "SELECT folio, monto_total, fecha_emision, tipo_documento \
                 FROM documentos_venta \
                 WHERE folio = $1 \
                   AND tipo_documento IN ('boleta', 'factura') \
                   AND fecha_emision >= $2 \
                 ORDER BY fecha_emision DESC \
                 LIMIT 1"
            }
            QueryFamily::Hardware => {
                "SELECT folio, monto_total, fecha_emision, tipo_documento FROM ( \
                     SELECT folio, total AS monto_total, fecha AS fecha_emision, \
                            'boleta' AS tipo_documento \
                     FROM boletas WHERE folio = $1 AND fecha >= $2 \
                     UNION ALL \
                     SELECT folio, total, fecha, 'factura' \
                     FROM facturas_cliente WHERE folio = $1 AND fecha >= $2 \
                 ) AS documentos \
                 ORDER BY fecha_emision DESC \
                 LIMIT 1"
            }
        };

        let row = tokio::time::timeout(
            self.query_timeout,
            sqlx::query(sql)
                .bind(folio)
                .bind(since)
                .fetch_optional(connection),
        )
        .await
        .map_err(|_| anyhow::anyhow!("branch query timed out"))??;

        Ok(row.map(|row| LedgerDocument {
            folio: row.get::<String, _>(0),
            total_amount: row.get::<i64, _>(1),
            issue_date: row.get::<NaiveDate, _>(2),
            document_kind: DocumentKind::parse(&row.get::<String, _>(3)),
        }))
    }
}

impl BranchProbe for SqlBranchProbe {
    async fn find_document(
        &self,
        branch: &BranchDescriptor,
        folio: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Option<LedgerDocument>> {
        let Some(url) = branch.db_url.as_deref() else {
            return Ok(None);
        };
        let Some(family) = branch.kind.query_family() else {
            return Ok(None);
        };

        let mut connection = tokio::time::timeout(self.connect_timeout, PgConnection::connect(url))
            .await
            .map_err(|_| anyhow::anyhow!("branch connection timed out"))??;

        let result = self.query_branch(&mut connection, family, folio, since).await;

        // Close whether or not the lookup matched; the next branch gets a
        // fresh connection.
        connection.close().await.ok();

        result
    }
}

/// Enforces a minimum interval between branch connection attempts so a scan
/// never hammers the remote servers back-to-back.
#[derive(Debug)]
pub struct ScanThrottle {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl ScanThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until the next attempt slot is free, then claim it.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut next_slot = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next_slot {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next_slot = Some(slot + self.min_interval);
            slot
        };

        let now = Instant::now();
        if wait_until > now {
            tokio::time::sleep(wait_until - now).await;
        }
    }
}

/// Per-branch circuit breakers, created lazily on first use
#[derive(Debug)]
pub struct BranchBreakers {
    config: RecoveryConfig,
    breakers: Mutex<HashMap<i64, Arc<CircuitBreaker>>>,
}

impl BranchBreakers {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn for_branch(&self, branch_id: i64) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(
            breakers
                .entry(branch_id)
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone()))),
        )
    }
}

/// Scans branch ledgers for a folio, first match wins.
#[derive(Debug)]
pub struct BranchLocator {
    minimum_amount: i64,
    campaign_start: NaiveDate,
    throttle: ScanThrottle,
    breakers: BranchBreakers,
}

impl BranchLocator {
    pub fn new(
        minimum_amount: i64,
        campaign_start: NaiveDate,
        attempt_interval: Duration,
        breaker_config: RecoveryConfig,
    ) -> Self {
        Self {
            minimum_amount,
            campaign_start,
            throttle: ScanThrottle::new(attempt_interval),
            breakers: BranchBreakers::new(breaker_config),
        }
    }

    /// Probe the branches in listed order and return the first match.
    ///
    /// Per-branch failures are logged, counted against that branch's circuit
    /// breaker and skipped; the scan itself never fails. A `kind_filter`
    /// restricts the scan to branches of one type.
    pub async fn locate<P: BranchProbe>(
        &self,
        branches: &[BranchDescriptor],
        folio: &str,
        kind_filter: Option<BranchKind>,
        probe: &P,
    ) -> LedgerMatch {
        for branch in branches {
            if let Some(filter) = kind_filter {
                if branch.kind != filter {
                    continue;
                }
            }
            if branch.kind.query_family().is_none() {
                // Unrecognized branch type: skip silently
                continue;
            }
            if branch.db_url.is_none() {
                debug!(branch = %branch.name, "Branch has no configured database, skipping");
                continue;
            }

            let breaker = self.breakers.for_branch(branch.id);
            if breaker.is_open() {
                debug!(branch = %branch.name, "Branch circuit breaker open, skipping");
                crate::observability::record_branch_probe(branch.kind.as_str(), "skipped_open");
                continue;
            }

            self.throttle.acquire().await;

            match probe.find_document(branch, folio, self.campaign_start).await {
                Ok(Some(document)) => {
                    breaker.record_success();
                    crate::observability::record_branch_probe(branch.kind.as_str(), "match");
                    info!(
                        branch = %branch.name,
                        folio = %document.folio,
                        amount = document.total_amount,
                        "Folio located in branch ledger"
                    );
                    return LedgerMatch::found(
                        branch,
                        &document,
                        self.minimum_amount,
                        self.campaign_start,
                    );
                }
                Ok(None) => {
                    breaker.record_success();
                    crate::observability::record_branch_probe(branch.kind.as_str(), "no_match");
                    debug!(branch = %branch.name, folio = %folio, "Folio not in this branch");
                }
                Err(err) => {
                    breaker.record_failure();
                    crate::observability::record_branch_probe(branch.kind.as_str(), "error");
                    error_logging::log_branch_error(&err, branch.id, &branch.name, folio);
                }
            }
        }

        info!(folio = %folio, "Folio not found in any branch ledger");
        LedgerMatch::not_found()
    }
}
