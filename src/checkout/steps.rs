use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    #[default]
    PersonalData,
    PaymentMethod,
    Confirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEvent {
    Continue,
    Back,
    Submit,
}

impl Step {
    /// Transition table, ignoring guards. `None` means the event is not accepted here.
    pub fn on(self, event: StepEvent) -> Option<Step> {
        match (self, event) {
            (Step::PersonalData, StepEvent::Continue) => Some(Step::PaymentMethod),
            (Step::PaymentMethod, StepEvent::Continue) => Some(Step::Confirmation),
            (Step::PaymentMethod, StepEvent::Back) => Some(Step::PersonalData),
            (Step::Confirmation, StepEvent::Back) => Some(Step::PaymentMethod),
            (Step::Confirmation, StepEvent::Submit) => Some(Step::Confirmation),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::PersonalData => "personalData",
            Step::PaymentMethod => "paymentMethod",
            Step::Confirmation => "confirmation",
        };
        f.write_str(s)
    }
}

impl fmt::Display for StepEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepEvent::Continue => "continue",
            StepEvent::Back => "back",
            StepEvent::Submit => "submit",
        };
        f.write_str(s)
    }
}
