use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a status response relates to the lifetime of the remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// The operation finished for good.
    Completed,
    /// Still in progress, ask again later.
    Pending,
    /// The operation is no longer valid and will never complete.
    Invalidated,
}

/// Maps a decoded status payload onto an [`OperationState`].
///
/// The bounded poller is generic over anything that implements this, so each
/// dashboard screen only has to describe its own vocabulary.
pub trait Classify {
    fn classify(&self) -> OperationState;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
    Paid,
    Pending,
    Expired,
}

/// Status of one checkout session as reported by the payment backend.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub status: CheckoutStatus,
    #[serde(default)]
    pub amount_total: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

impl CheckoutSession {
    pub fn new(id: impl Into<String>, status: CheckoutStatus) -> Self {
        Self {
            id: id.into(),
            status,
            amount_total: None,
            currency: None,
            customer_email: None,
        }
    }
}

impl Classify for CheckoutSession {
    fn classify(&self) -> OperationState {
        match self.status {
            CheckoutStatus::Paid => OperationState::Completed,
            CheckoutStatus::Pending => OperationState::Pending,
            CheckoutStatus::Expired => OperationState::Invalidated,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CampaignJobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A creative-generation run launched from the campaign execution hub.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CampaignJob {
    pub id: String,
    pub status: CampaignJobStatus,
    /// Percentage in `0..=100`.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub creatives_generated: u32,
}

impl Classify for CampaignJob {
    fn classify(&self) -> OperationState {
        match self.status {
            CampaignJobStatus::Completed => OperationState::Completed,
            CampaignJobStatus::Failed | CampaignJobStatus::Cancelled => {
                OperationState::Invalidated
            }
            CampaignJobStatus::Queued | CampaignJobStatus::Running => OperationState::Pending,
        }
    }
}
