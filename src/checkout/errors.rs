use thiserror::Error;

use crate::checkout::draft::DraftError;
use crate::checkout::intake::ValidationReport;
use crate::checkout::steps::{Step, StepEvent};
use crate::payments::errors::PaymentApiError;

/// Shown when the customer tries to leave step 1 with incomplete data.
pub const INTAKE_ALERT: &str = "Por favor, preencha todos os campos obrigatórios corretamente.";
/// Shown when the terms checkbox is unticked.
pub const TERMS_ALERT: &str = "Você precisa aceitar os termos de uso para continuar.";
/// Shown when creating the PIX payment fails for any reason.
pub const SUBMISSION_ALERT: &str = "Erro ao processar o pagamento. Por favor, tente novamente.";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid order draft: {0}")]
    Draft(#[from] DraftError),
    #[error("customer data incomplete or malformed")]
    IntakeInvalid(ValidationReport),
    #[error("terms of use not accepted")]
    TermsNotAccepted,
    #[error("event '{event}' not accepted in step '{from}'")]
    InvalidTransition { from: Step, event: StepEvent },
    #[error("customer data is frozen once payment begins")]
    IntakeFrozen,
    #[error("a payment request is already in flight")]
    AlreadyProcessing,
    #[error("payment already requested for this checkout")]
    AlreadySubmitted,
    #[error("payment submission failed: {0}")]
    Submission(#[from] PaymentApiError),
    #[error("payment submission task failed: {0}")]
    SubmissionTask(String),
}

impl CheckoutError {
    /// User-facing alert for errors the customer can act on.
    pub fn alert(&self) -> Option<&'static str> {
        match self {
            CheckoutError::IntakeInvalid(_) => Some(INTAKE_ALERT),
            CheckoutError::TermsNotAccepted => Some(TERMS_ALERT),
            CheckoutError::Submission(_) => Some(SUBMISSION_ALERT),
            _ => None,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            CheckoutError::Draft(_) => 400,
            CheckoutError::IntakeInvalid(_) | CheckoutError::TermsNotAccepted => 422,
            CheckoutError::InvalidTransition { .. }
            | CheckoutError::IntakeFrozen
            | CheckoutError::AlreadyProcessing
            | CheckoutError::AlreadySubmitted => 409,
            CheckoutError::Submission(_) => 502,
            CheckoutError::SubmissionTask(_) => 500,
        }
    }
}
