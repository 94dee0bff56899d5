//! Control module interface
//!
//! A control module is constructed with `Default`, initialised once from its parameter file and
//! then processed once per input.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::info;

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A cyclic control module.
pub trait State: Default {
    /// Name used when logging about the module.
    const NAME: &'static str;

    type InitData;
    type InitError;

    type InputData;
    type OutputData;
    /// Diagnostics of one processing cycle.
    type StatusReport;
    /// An error which stops processing altogether. Errors the module can recover from shall be
    /// reported in the status report instead.
    type ProcError;

    /// Initialise the module, setting up any archives within `session`.
    fn init(&mut self, init_data: Self::InitData, session: &Session)
        -> Result<(), Self::InitError>;

    /// Process one input, producing the output and a status report.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Construct and initialise a module.
pub fn init_module<S: State>(init_data: S::InitData, session: &Session) 
    -> Result<S, S::InitError> 
{
    let mut module = S::default();
    module.init(init_data, session)?;

    info!("{} init complete", S::NAME);

    Ok(module)
}
