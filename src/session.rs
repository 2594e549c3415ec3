//! Timed session state machine.
//!
//! Exactly one phase is active at a time. A transition runs the old phase's
//! exit hook, stores the new phase, then runs its enter hook; the per-tick
//! run hook executes afterwards. All scene side effects go through the
//! [`StageDirector`] collaborator so the machine itself stays headless.

use crate::calibration::DeviceKind;
use crate::pose::{Pose, PoseStore, SharedPipeline};
use crate::server::{CommandChannel, VIBRATION_COMMAND};
use serde::Serialize;

/// Seconds the intro sequence runs before the fight starts.
pub const INTRO_LENGTH_SECS: f64 = 40.0;
/// Intro cue: the scrolling intro text appears.
const INTRO_TEXT_CUE_SECS: f64 = 4.0;
/// Intro cue: the backdrop is dropped and the title fades out.
const INTRO_FADE_OUT_CUE_SECS: f64 = 5.0;
/// Seconds to wait for a host trigger before falling back to spectating.
pub const NETWORK_SETUP_MAX_WAIT_SECS: f64 = 2000.0;
/// Length of one fight round.
pub const FIGHT_LENGTH_SECS: f64 = 60.0;
/// Points per registered hit.
pub const HIT_SCORE: u32 = 10;
/// Remaining-time thresholds that release the second and third target waves.
const WAVE_TWO_THRESHOLD_SECS: f64 = 40.0;
const WAVE_THREE_THRESHOLD_SECS: f64 = 20.0;

/// Mutually exclusive session phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    NetworkSetup,
    Intro,
    Fight,
    Win,
    Loose,
    Spectating,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::NetworkSetup => "NetworkSetup",
            Phase::Intro => "Intro",
            Phase::Fight => "Fight",
            Phase::Win => "Win",
            Phase::Loose => "Loose",
            Phase::Spectating => "Spectating",
        }
    }
}

/// External, discrete signals the machine reacts to. Triggers the active
/// phase does not list are ignored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Trigger {
    HostStart,
    ClientStart,
    ForceRestart,
    ForceIntro,
    SpawnRequest,
    KillAll,
    ScoreHit,
    SelectDevice(DeviceKind),
    Calibrate,
    /// Nudge the heading trim by this many degrees.
    AdjustTrim(f64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Viewpoint {
    Intro,
    Main,
    Spectator,
}

/// Collaborator boundary for everything scene-side: rendering, cameras, UI
/// text, asset instantiation. The machine calls in, never the reverse.
pub trait StageDirector {
    /// Start hosting the shared scene.
    fn setup_host(&mut self);
    /// Join the shared scene as a viewer.
    fn setup_client(&mut self);
    /// One-time population of the scene with its fixed props.
    fn spawn_world(&mut self);
    /// Release one wave of targets.
    fn spawn_targets(&mut self);
    fn kill_all_targets(&mut self);
    fn switch_viewpoint(&mut self, view: Viewpoint);
    fn set_win_banner(&mut self, visible: bool);
    fn set_spectator_rig(&mut self, active: bool);
    fn set_intro_backdrop(&mut self, visible: bool);
    fn show_intro_text(&mut self);
    fn hide_intro_text(&mut self);
    /// `true` fades the title in, `false` fades it out.
    fn fade_intro(&mut self, fading_in: bool);
    fn update_score(&mut self, score: u32);
    fn update_high_score(&mut self, high_score: u32);
    fn update_time_left(&mut self, seconds: f64);
    /// Per-tick pose forwarding while a fight is running.
    fn drive_saber(&mut self, pose: &Pose);
}

/// Enter/run/exit handlers for one phase. The transition table is data:
/// each phase maps to its three handlers, which keeps the hooks testable
/// in isolation.
struct PhaseHandlers<D: StageDirector> {
    enter: fn(&mut SessionEngine<D>),
    run: fn(&mut SessionEngine<D>, f64),
    exit: fn(&mut SessionEngine<D>),
}

pub struct SessionEngine<D: StageDirector> {
    phase: Phase,
    director: D,
    pose: PoseStore,
    commands: CommandChannel,
    pipeline: SharedPipeline,

    setup_elapsed: f64,
    intro_elapsed: f64,
    time_remaining: f64,
    score: u32,
    high_score: u32,
    waves_spawned: u8,
    has_spawned_world: bool,

    // One-shot intro cue guards, reset on every intro entry.
    fade_in_started: bool,
    fade_out_started: bool,
    intro_text_shown: bool,
}

impl<D: StageDirector> SessionEngine<D> {
    pub fn new(
        director: D,
        pose: PoseStore,
        commands: CommandChannel,
        pipeline: SharedPipeline,
    ) -> Self {
        let mut engine = SessionEngine {
            phase: Phase::NetworkSetup,
            director,
            pose,
            commands,
            pipeline,
            setup_elapsed: 0.0,
            intro_elapsed: 0.0,
            time_remaining: 0.0,
            score: 0,
            high_score: 0,
            waves_spawned: 0,
            has_spawned_world: false,
            fade_in_started: false,
            fade_out_started: false,
            intro_text_shown: false,
        };
        (Self::handlers(engine.phase).enter)(&mut engine);
        engine
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn high_score(&self) -> u32 {
        self.high_score
    }

    pub fn time_remaining(&self) -> f64 {
        self.time_remaining
    }

    /// Advance the active phase by `dt` seconds of elapsed time.
    pub fn tick(&mut self, dt: f64) {
        (Self::handlers(self.phase).run)(self, dt);
    }

    /// Feed one external trigger event.
    pub fn handle(&mut self, trigger: Trigger) {
        // Device selection and calibration act on the sensor pipeline and
        // are accepted in every phase.
        match trigger {
            Trigger::SelectDevice(kind) => {
                if let Ok(mut pipeline) = self.pipeline.lock() {
                    pipeline.set_device(kind);
                }
                return;
            }
            Trigger::Calibrate => {
                if let Ok(mut pipeline) = self.pipeline.lock() {
                    pipeline.calibrate();
                }
                return;
            }
            Trigger::AdjustTrim(delta_deg) => {
                if let Ok(mut pipeline) = self.pipeline.lock() {
                    pipeline.adjust_trim(delta_deg);
                }
                return;
            }
            _ => {}
        }

        match (self.phase, trigger) {
            (Phase::NetworkSetup, Trigger::HostStart) => {
                self.director.setup_host();
                self.change_phase(Phase::Intro);
            }
            (Phase::NetworkSetup, Trigger::ClientStart) => {
                self.director.setup_client();
                self.change_phase(Phase::Spectating);
            }
            (Phase::Fight, Trigger::ForceRestart) => self.change_phase(Phase::Fight),
            (Phase::Fight, Trigger::ForceIntro) => self.change_phase(Phase::Intro),
            (Phase::Fight, Trigger::SpawnRequest) => self.director.spawn_targets(),
            (Phase::Fight, Trigger::KillAll) => self.director.kill_all_targets(),
            (Phase::Fight, Trigger::ScoreHit) => self.add_score(),
            (Phase::Win, Trigger::ForceRestart) => self.change_phase(Phase::Fight),
            (Phase::Win, Trigger::ForceIntro) => self.change_phase(Phase::Intro),
            _ => {}
        }
    }

    fn handlers(phase: Phase) -> PhaseHandlers<D> {
        match phase {
            Phase::NetworkSetup => PhaseHandlers {
                enter: Self::enter_network_setup,
                run: Self::run_network_setup,
                exit: Self::exit_noop,
            },
            Phase::Intro => PhaseHandlers {
                enter: Self::enter_intro,
                run: Self::run_intro,
                exit: Self::exit_intro,
            },
            Phase::Fight => PhaseHandlers {
                enter: Self::enter_fight,
                run: Self::run_fight,
                exit: Self::exit_noop,
            },
            Phase::Win => PhaseHandlers {
                enter: Self::enter_win,
                run: Self::run_noop,
                exit: Self::exit_win,
            },
            // Reserved branch: entering and leaving it must stay side-effect
            // free until losing gets real behavior.
            Phase::Loose => PhaseHandlers {
                enter: Self::enter_noop,
                run: Self::run_noop,
                exit: Self::exit_noop,
            },
            Phase::Spectating => PhaseHandlers {
                enter: Self::enter_spectating,
                run: Self::run_noop,
                exit: Self::exit_spectating,
            },
        }
    }

    fn change_phase(&mut self, next: Phase) {
        log::info!(
            "[session] switching from {} to {}",
            self.phase.name(),
            next.name()
        );
        (Self::handlers(self.phase).exit)(self);
        self.phase = next;
        (Self::handlers(next).enter)(self);
    }

    fn add_score(&mut self) {
        self.score += HIT_SCORE;
        if self.score > self.high_score {
            self.high_score = self.score;
            self.director.update_high_score(self.high_score);
        }
        self.director.update_score(self.score);
        self.commands.send(VIBRATION_COMMAND);
    }

    // --- NetworkSetup ---

    fn enter_network_setup(&mut self) {
        self.setup_elapsed = 0.0;
        log::info!("[session] host-start to run a host, client-start (or wait) to spectate");
    }

    fn run_network_setup(&mut self, dt: f64) {
        self.setup_elapsed += dt;
        if self.setup_elapsed > NETWORK_SETUP_MAX_WAIT_SECS {
            self.director.setup_client();
            self.change_phase(Phase::Spectating);
        }
    }

    // --- Intro ---

    fn enter_intro(&mut self) {
        self.director.kill_all_targets();
        self.director.set_intro_backdrop(true);
        self.intro_elapsed = 0.0;
        self.fade_in_started = false;
        self.fade_out_started = false;
        self.intro_text_shown = false;
        self.director.switch_viewpoint(Viewpoint::Intro);
    }

    fn run_intro(&mut self, dt: f64) {
        self.intro_elapsed += dt;
        if self.intro_elapsed > INTRO_LENGTH_SECS {
            self.change_phase(Phase::Fight);
            return;
        }

        if !self.fade_in_started {
            self.director.fade_intro(true);
            self.fade_in_started = true;
        }
        if self.intro_elapsed > INTRO_FADE_OUT_CUE_SECS && !self.fade_out_started {
            self.director.set_intro_backdrop(false);
            self.director.fade_intro(false);
            self.fade_out_started = true;
        }
        if self.intro_elapsed > INTRO_TEXT_CUE_SECS && !self.intro_text_shown {
            self.director.show_intro_text();
            self.intro_text_shown = true;
        }
    }

    fn exit_intro(&mut self) {
        self.director.hide_intro_text();
        self.director.switch_viewpoint(Viewpoint::Main);
    }

    // --- Fight ---

    fn enter_fight(&mut self) {
        if !self.has_spawned_world {
            self.director.spawn_world();
            self.has_spawned_world = true;
        }
        self.director.kill_all_targets();
        self.waves_spawned = 0;
        self.director.spawn_targets();
        self.waves_spawned = 1;

        self.score = 0;
        self.time_remaining = FIGHT_LENGTH_SECS;
        self.director.update_score(self.score);
        self.director.update_time_left(self.time_remaining);
        self.director.update_high_score(self.high_score);
        self.director.switch_viewpoint(Viewpoint::Main);
    }

    fn run_fight(&mut self, dt: f64) {
        if self.time_remaining < WAVE_TWO_THRESHOLD_SECS && self.waves_spawned == 1 {
            self.director.spawn_targets();
            self.waves_spawned = 2;
        }
        if self.time_remaining < WAVE_THREE_THRESHOLD_SECS && self.waves_spawned == 2 {
            self.director.spawn_targets();
            self.waves_spawned = 3;
        }

        if self.time_remaining <= 0.0 {
            self.director.update_time_left(0.0);
            self.change_phase(Phase::Win);
            return;
        }
        self.time_remaining -= dt;

        let pose = self.pose.get();
        self.director.drive_saber(&pose);
        self.director.update_time_left(self.time_remaining);
    }

    // --- Win ---

    fn enter_win(&mut self) {
        self.director.kill_all_targets();
        self.director.set_win_banner(true);
    }

    fn exit_win(&mut self) {
        self.director.set_win_banner(false);
    }

    // --- Spectating ---

    fn enter_spectating(&mut self) {
        self.director.set_spectator_rig(true);
        self.director.switch_viewpoint(Viewpoint::Spectator);
    }

    fn exit_spectating(&mut self) {
        self.director.set_spectator_rig(false);
    }

    // --- Loose (reserved) ---

    fn enter_noop(&mut self) {}

    fn run_noop(&mut self, _dt: f64) {}

    fn exit_noop(&mut self) {}
}

/// Director that narrates every scene call to the log. The shipped binary
/// runs headless, so this is its whole presentation layer.
#[derive(Default)]
pub struct LoggingDirector;

impl StageDirector for LoggingDirector {
    fn setup_host(&mut self) {
        log::info!("[stage] hosting session");
    }

    fn setup_client(&mut self) {
        log::info!("[stage] joining as client");
    }

    fn spawn_world(&mut self) {
        log::info!("[stage] spawning world props");
    }

    fn spawn_targets(&mut self) {
        log::info!("[stage] releasing target wave");
    }

    fn kill_all_targets(&mut self) {
        log::info!("[stage] clearing all targets");
    }

    fn switch_viewpoint(&mut self, view: Viewpoint) {
        log::info!("[stage] switching viewpoint to {:?}", view);
    }

    fn set_win_banner(&mut self, visible: bool) {
        log::info!("[stage] win banner visible: {}", visible);
    }

    fn set_spectator_rig(&mut self, active: bool) {
        log::info!("[stage] spectator rig active: {}", active);
    }

    fn set_intro_backdrop(&mut self, visible: bool) {
        log::info!("[stage] intro backdrop visible: {}", visible);
    }

    fn show_intro_text(&mut self) {
        log::info!("[stage] intro text on");
    }

    fn hide_intro_text(&mut self) {
        log::info!("[stage] intro text off");
    }

    fn fade_intro(&mut self, fading_in: bool) {
        log::info!("[stage] intro title fading {}", if fading_in { "in" } else { "out" });
    }

    fn update_score(&mut self, score: u32) {
        log::info!("[stage] score: {}", score);
    }

    fn update_high_score(&mut self, high_score: u32) {
        log::info!("[stage] high score: {}", high_score);
    }

    fn update_time_left(&mut self, seconds: f64) {
        log::debug!("[stage] time left: {:.2}", seconds);
    }

    fn drive_saber(&mut self, pose: &Pose) {
        log::trace!(
            "[stage] saber pose, accel {:.2}",
            pose.accel_magnitude
        );
    }
}
