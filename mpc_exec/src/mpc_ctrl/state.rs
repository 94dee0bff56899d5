//! Implementations for the MpcCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use comms_if::sim::{SteerCmd, Telemetry};
use log::{error, trace, warn};
use serde::Serialize;

// Internal
use super::{
    cycle::{self, CycleError, CycleOutput},
    solver::{PanocSolver, Optimizer, SolveFailure, SolveStats},
    ActuatorCommand, MpcCtrlError, OptimizationProblem, Params,
};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    module::State,
    params,
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Session relative path failed problems are saved under, a timestamp is appended to the stem.
const FAILED_SOLVE_PATH: &str = "failed_solves/mpc_problem.json";

/// Maximum number of failed problems saved per session.
const MAX_FAILED_SOLVE_DUMPS: usize = 50;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// MPC control module state.
///
/// One instance drives one vehicle. The previous command and the optimiser belong to the
/// instance.
pub struct MpcCtrl {
    pub(crate) params: Params,

    optimizer: Box<dyn Optimizer + Send>,

    /// Save failed problems through the session's save thread.
    save_failed_solves: bool,

    /// Number of failed problems saved so far.
    failed_solve_dumps: usize,

    pub(crate) report: StatusReport,
    arch_report: Archiver,

    pub(crate) output: Option<OutputData>,
    arch_output: Archiver,
}

/// Output of MpcCtrl, the command for the vehicle and the trajectories to display.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OutputData {
    pub command: ActuatorCommand,

    /// Predicted trajectory, vehicle frame. Empty for a safe default command.
    pub mpc_x: Vec<f64>,
    pub mpc_y: Vec<f64>,

    /// Reference curve samples, vehicle frame. Empty for a safe default command.
    pub next_x: Vec<f64>,
    pub next_y: Vec<f64>,

    /// True if the command is the safe default rather than a solution.
    pub safe_default: bool,
}

/// Status report for MpcCtrl processing.
#[derive(Clone, Copy, Default, Serialize, Debug, PartialEq)]
pub struct StatusReport {
    pub safe_default: bool,

    pub invalid_input: bool,
    pub fit_failed: bool,
    pub infeasible: bool,
    pub iteration_limit: bool,
    pub numerical_error: bool,

    pub cte: f64,
    pub epsi: f64,
    pub target_speed: f64,
    pub target_speed_limited: bool,

    pub cost: f64,
    pub iterations: usize,
    pub solve_time_s: f64,
    pub max_violation: f64,
}

/// Record saved when a solve fails.
#[derive(Serialize)]
struct FailedSolve {
    failure: SolveFailure,
    stats: SolveStats,
    problem: OptimizationProblem,
}

/// Flat archive record of the output.
#[derive(Serialize)]
struct ArchivedOutput {
    steering: f64,
    throttle: f64,
    safe_default: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for MpcCtrl {
    fn default() -> Self {
        let params = Params::default();

        Self {
            optimizer: Box::new(PanocSolver::new(params.solver.clone())),
            params,
            save_failed_solves: false,
            failed_solve_dumps: 0,
            report: StatusReport::default(),
            arch_report: Archiver::default(),
            output: None,
            arch_output: Archiver::default(),
        }
    }
}

impl State for MpcCtrl {
    const NAME: &'static str = "MpcCtrl";

    type InitData = &'static str;
    type InitError = MpcCtrlError;

    type InputData = Telemetry;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = MpcCtrlError;

    /// Initialise the MpcCtrl module.
    ///
    /// Expected init data is the path to the parameter file
    fn init(&mut self, init_data: Self::InitData, session: &Session) 
        -> Result<(), Self::InitError> 
    {
        // Load and check the parameters
        let params: Params = params::load(init_data)
            .map_err(MpcCtrlError::ParamLoadError)?;
        params.validate()
            .map_err(MpcCtrlError::InvalidConfig)?;

        self.optimizer = Box::new(PanocSolver::new(params.solver.clone()));
        self.params = params;

        // Initialise the archivers
        self.arch_report = Archiver::from_path(session, "mpc_ctrl/status_report.csv")
            .map_err(MpcCtrlError::ArchiveError)?;
        self.arch_output = Archiver::from_path(session, "mpc_ctrl/output.csv")
            .map_err(MpcCtrlError::ArchiveError)?;

        self.save_failed_solves = true;

        Ok(())
    }

    /// Perform cyclic processing of MPC control.
    ///
    /// Recoverable cycle errors produce the safe default command and are flagged in the status
    /// report. Only configuration errors are returned.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> 
    {
        // Clear the status report
        self.report = StatusReport::default();

        let output = match cycle::run(&self.params, input_data, self.optimizer.as_mut()) {
            Ok(out) => {
                self.report_cycle(&out);

                OutputData {
                    command: out.command,
                    mpc_x: out.extracted.predicted_x,
                    mpc_y: out.extracted.predicted_y,
                    next_x: out.ref_x,
                    next_y: out.ref_y,
                    safe_default: false,
                }
            },
            Err(CycleError::ConfigInvariantViolation(e)) => {
                error!("MpcCtrl configuration error: {}", e);
                return Err(MpcCtrlError::InvalidConfig(e))
            },
            Err(e) => {
                warn!("MpcCtrl using safe default command: {}", e);
                self.report_error(e);

                self.safe_default()
            }
        };

        trace!("MpcCtrl output: {:?}", output.command);

        // Update the output in self
        self.output = Some(output.clone());

        Ok((output, self.report))
    }
}

impl Archived for MpcCtrl {
    fn write(&mut self) -> Result<(), ArchiveError> {
        self.arch_report.serialise(self.report)?;

        if let Some(ref o) = self.output {
            self.arch_output.serialise(ArchivedOutput {
                steering: o.command.steering,
                throttle: o.command.throttle,
                safe_default: o.safe_default,
            })?;
        }

        Ok(())
    }
}

impl MpcCtrl {
    /// Create a new controller from parameters, without archiving.
    pub fn new(params: Params) -> Result<Self, MpcCtrlError> {
        params.validate().map_err(MpcCtrlError::InvalidConfig)?;

        Ok(Self {
            optimizer: Box::new(PanocSolver::new(params.solver.clone())),
            params,
            ..Default::default()
        })
    }

    /// Replace the optimiser.
    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer + Send>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The last command produced, if any.
    pub fn last_command(&self) -> Option<ActuatorCommand> {
        self.output.as_ref().map(|o| o.command)
    }

    /// Keep the previous steering with the throttle zeroed. If there is no previous output
    /// both are zero.
    fn safe_default(&mut self) -> OutputData {
        self.report.safe_default = true;

        let steering = match self.output {
            Some(ref o) => o.command.steering,
            None => 0.0
        };

        OutputData {
            command: ActuatorCommand {
                steering,
                throttle: 0.0,
            },
            safe_default: true,
            ..Default::default()
        }
    }

    fn report_cycle(&mut self, out: &CycleOutput) {
        self.report.cte = out.initial_state.cte;
        self.report.epsi = out.initial_state.epsi;
        self.report.target_speed = out.target_speed;
        self.report.target_speed_limited = out.target_speed_limited;
        self.report.cost = out.cost;
        self.report_stats(&out.stats);
    }

    fn report_stats(&mut self, stats: &SolveStats) {
        self.report.iterations = stats.iterations;
        self.report.solve_time_s = stats.solve_time_s;
        self.report.max_violation = stats.max_violation;
    }

    fn report_error(&mut self, e: CycleError) {
        match e {
            CycleError::InvalidInput(_) => self.report.invalid_input = true,
            CycleError::FitError(_) => self.report.fit_failed = true,
            CycleError::SolveFailed { failure, problem, stats } => {
                match failure {
                    SolveFailure::Infeasible { .. } => self.report.infeasible = true,
                    SolveFailure::IterationLimit => self.report.iteration_limit = true,
                    SolveFailure::NumericalError(_) => self.report.numerical_error = true,
                }

                self.report.cte = problem.eval.layout.state_at(&problem.initial_guess, 0).cte;
                self.report.epsi = problem.eval.layout.state_at(&problem.initial_guess, 0).epsi;
                self.report.target_speed = problem.eval.target_speed;
                self.report_stats(&stats);

                if self.save_failed_solves && self.failed_solve_dumps < MAX_FAILED_SOLVE_DUMPS {
                    session::save_with_timestamp(FAILED_SOLVE_PATH, FailedSolve {
                        failure,
                        stats,
                        problem: *problem,
                    });

                    self.failed_solve_dumps += 1;
                    if self.failed_solve_dumps == MAX_FAILED_SOLVE_DUMPS {
                        warn!(
                            "MpcCtrl saved {} failed problems, no more will be saved", 
                            MAX_FAILED_SOLVE_DUMPS
                        );
                    }
                }
            },
            CycleError::ConfigInvariantViolation(_) => (),
        }
    }
}

impl OutputData {
    /// Convert into the steering message for the simulator.
    pub fn to_steer_cmd(&self) -> SteerCmd {
        SteerCmd {
            steering_angle: self.command.steering,
            throttle: self.command.throttle,
            mpc_x: self.mpc_x.clone(),
            mpc_y: self.mpc_y.clone(),
            next_x: self.next_x.clone(),
            next_y: self.next_y.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
