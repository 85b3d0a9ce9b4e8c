//! Metrics recorded while accepting blocks.
//!
//! The [`Acceptor`](crate::acceptor::Acceptor) reports to a [`Metrics`] sink:
//! - every block it accepts, through [`mark_accepted`](Metrics::mark_accepted), and
//! - for every decided proposal, whether the option the local proposer initially preferred is the one
//!   that got accepted, through [`mark_option_vote_won`](Metrics::mark_option_vote_won) and
//!   [`mark_option_vote_lost`](Metrics::mark_option_vote_lost).
//!
//! [`PrometheusMetrics`] is the default sink. It registers its collectors into a caller-provided
//! [`Registry`], which the node can expose however it exposes its other metrics.

use std::fmt::{self, Display};

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::types::block::Block;

pub trait Metrics: Send {
    /// Record that `block` was accepted. Failing to do so indicates a bug, and is fatal to the caller.
    fn mark_accepted(&self, block: &Block) -> Result<(), MetricsError>;

    fn mark_option_vote_won(&self);

    fn mark_option_vote_lost(&self);
}

/// Prometheus-backed implementation of [`Metrics`].
#[derive(Clone)]
pub struct PrometheusMetrics {
    /// Number of accepted blocks, labelled by block kind.
    pub blocks_accepted: IntCounterVec,
    /// Number of transactions in accepted blocks.
    pub txs_accepted: IntCounter,
    /// Number of decided proposals whose initially preferred option was accepted.
    pub option_votes_won: IntCounter,
    /// Number of decided proposals whose initially preferred option was not accepted.
    pub option_votes_lost: IntCounter,
    /// Height of the most recently accepted block.
    pub last_accepted_height: IntGauge,
}

impl PrometheusMetrics {
    /// Registers acceptance metrics into the given `Registry`, prefixing every name with `namespace`.
    pub fn register(namespace: &str, registry: &Registry) -> Result<Self, prometheus::Error> {
        let blocks_accepted = IntCounterVec::new(
            Opts::new("blocks_accepted", "Number of accepted blocks").namespace(namespace),
            &["kind"],
        )?;
        registry.register(Box::new(blocks_accepted.clone()))?;

        let txs_accepted = IntCounter::with_opts(
            Opts::new(
                "txs_accepted",
                "Number of transactions contained in accepted blocks",
            )
            .namespace(namespace),
        )?;
        registry.register(Box::new(txs_accepted.clone()))?;

        let option_votes_won = IntCounter::with_opts(
            Opts::new(
                "option_votes_won",
                "Number of decided proposals whose initially preferred option was accepted",
            )
            .namespace(namespace),
        )?;
        registry.register(Box::new(option_votes_won.clone()))?;

        let option_votes_lost = IntCounter::with_opts(
            Opts::new(
                "option_votes_lost",
                "Number of decided proposals whose initially preferred option was rejected",
            )
            .namespace(namespace),
        )?;
        registry.register(Box::new(option_votes_lost.clone()))?;

        let last_accepted_height = IntGauge::with_opts(
            Opts::new(
                "last_accepted_height",
                "Height of the most recently accepted block",
            )
            .namespace(namespace),
        )?;
        registry.register(Box::new(last_accepted_height.clone()))?;

        Ok(Self {
            blocks_accepted,
            txs_accepted,
            option_votes_won,
            option_votes_lost,
            last_accepted_height,
        })
    }
}

impl Metrics for PrometheusMetrics {
    fn mark_accepted(&self, block: &Block) -> Result<(), MetricsError> {
        let height = i64::try_from(block.height.int())
            .map_err(|_| MetricsError::HeightOutOfRange(block.height.int()))?;

        self.blocks_accepted
            .get_metric_with_label_values(&[block.kind().label()])?
            .inc();
        self.txs_accepted
            .inc_by(block.body.transactions().len() as u64);
        self.last_accepted_height.set(height);
        Ok(())
    }

    fn mark_option_vote_won(&self) {
        self.option_votes_won.inc()
    }

    fn mark_option_vote_lost(&self) {
        self.option_votes_lost.inc()
    }
}

#[derive(Debug)]
pub enum MetricsError {
    Prometheus(prometheus::Error),
    /// The height does not fit in a Prometheus gauge.
    HeightOutOfRange(u64),
}

impl From<prometheus::Error> for MetricsError {
    fn from(value: prometheus::Error) -> Self {
        MetricsError::Prometheus(value)
    }
}

impl Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsError::Prometheus(err) => write!(f, "prometheus error: {}", err),
            MetricsError::HeightOutOfRange(height) => {
                write!(f, "height {} does not fit in a gauge", height)
            }
        }
    }
}

impl std::error::Error for MetricsError {}
