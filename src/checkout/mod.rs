// The checkout wizard: order draft, customer intake, pricing, step control, payment
// submission and settlement watching.

pub mod draft;
pub mod errors;
pub mod intake;
pub mod pricing;
pub mod session;
pub mod settlement;
pub mod steps;
pub mod submit;

pub use draft::OrderDraft;
pub use errors::CheckoutError;
pub use session::{CheckoutSession, CheckoutView};
pub use submit::PaymentSubmitter;
