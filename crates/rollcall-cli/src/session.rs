//! Operator session: the login / dashboard state machine and the two modal
//! camera loops (enrollment and live attendance).
//!
//! Each state handler returns the next state. Notices are shown through the
//! [`Console`]; only terminal I/O failures propagate out of [`Session::run`].

use crate::config::Config;
use crate::console::{Console, NoticeKind, Preview};
use crate::devices::Devices;
use crate::preview::Overlay;
use anyhow::Context;
use rollcall_core::{FaceDetector, FaceRecognizer, PixelDiffMatcher, TemplateError, TemplateStore};
use rollcall_hw::{CameraError, FrameSource};
use rollcall_store::{AttendanceError, AttendanceLog, CredentialError, CredentialStore, MarkedSet};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    LoggedOut,
    LoggingIn,
    Registering,
    Dashboard,
    Enrolling,
    Recognizing,
    Viewing,
    Exit,
}

const LOGIN_MENU: [&str; 3] = ["Login", "Register", "Exit"];
const DASHBOARD_MENU: [&str; 4] = ["Start attendance", "Add new face", "View attendance", "Exit"];

/// How a capture loop finished.
#[derive(Debug)]
enum CaptureEnd {
    Saved,
    Cancelled,
    /// Frame acquisition failed, including the device opening or running dry.
    StreamEnded(CameraError),
    Failed(String),
}

pub struct Session<'a> {
    devices: &'a dyn Devices,
    matcher: PixelDiffMatcher,
    credentials: CredentialStore,
    templates: TemplateStore,
    attendance: AttendanceLog,
    marked: MarkedSet,
    state: State,
    operator: Option<String>,
}

impl<'a> Session<'a> {
    /// Open every store under the configured data directory.
    pub fn open(config: &Config, devices: &'a dyn Devices) -> anyhow::Result<Self> {
        let credentials = CredentialStore::open(config.db_path())
            .with_context(|| format!("opening credential store {}", config.db_path().display()))?;
        let templates = TemplateStore::open(config.faces_dir()).with_context(|| {
            format!("opening template directory {}", config.faces_dir().display())
        })?;
        let attendance = AttendanceLog::open(config.attendance_path()).with_context(|| {
            format!("opening attendance log {}", config.attendance_path().display())
        })?;

        Ok(Self {
            devices,
            matcher: config.matcher(),
            credentials,
            templates,
            attendance,
            marked: MarkedSet::new(),
            state: State::LoggedOut,
            operator: None,
        })
    }

    /// Names marked present since the session started.
    pub fn marked(&self) -> &MarkedSet {
        &self.marked
    }

    /// Drive the state machine until `Exit`.
    pub fn run(&mut self, console: &mut dyn Console) -> io::Result<()> {
        while self.state != State::Exit {
            let next = self.step(console)?;
            if next != self.state {
                tracing::debug!(from = ?self.state, to = ?next, "state change");
            }
            self.state = next;
        }
        tracing::info!(
            operator = self.operator.as_deref().unwrap_or(""),
            marked = self.marked.len(),
            "session ended"
        );
        Ok(())
    }

    fn step(&mut self, console: &mut dyn Console) -> io::Result<State> {
        match self.state {
            State::LoggedOut => self.logged_out(console),
            State::LoggingIn => self.logging_in(console),
            State::Registering => self.registering(console),
            State::Dashboard => self.dashboard(console),
            State::Enrolling => self.enrolling(console),
            State::Recognizing => self.recognizing(console),
            State::Viewing => self.viewing(console),
            State::Exit => Ok(State::Exit),
        }
    }

    fn logged_out(&mut self, console: &mut dyn Console) -> io::Result<State> {
        Ok(match console.choose("Administrator login", &LOGIN_MENU)? {
            Some(0) => State::LoggingIn,
            Some(1) => State::Registering,
            _ => State::Exit,
        })
    }

    fn logging_in(&mut self, console: &mut dyn Console) -> io::Result<State> {
        let Some(username) = console.prompt("Username (blank to go back)")? else {
            return Ok(State::Exit);
        };
        if username.is_empty() {
            return Ok(State::LoggedOut);
        }
        let Some(password) = console.prompt_secret("Password")? else {
            return Ok(State::Exit);
        };

        match self.credentials.authenticate(&username, &password) {
            Ok(true) => {
                tracing::info!(username, "login succeeded");
                self.operator = Some(username);
                Ok(State::Dashboard)
            }
            Ok(false) => {
                tracing::warn!(username, "login failed");
                console.notice(NoticeKind::Error, "Invalid credentials.");
                Ok(State::LoggingIn)
            }
            Err(e) => {
                tracing::error!(error = %e, "credential lookup failed");
                console.notice(NoticeKind::Error, &e.to_string());
                Ok(State::LoggedOut)
            }
        }
    }

    fn registering(&mut self, console: &mut dyn Console) -> io::Result<State> {
        let Some(username) = console.prompt("New username")? else {
            return Ok(State::Exit);
        };
        let Some(password) = console.prompt_secret("New password")? else {
            return Ok(State::Exit);
        };

        match self.credentials.register(&username, &password) {
            Ok(()) => {
                console.notice(NoticeKind::Info, "Admin registered successfully!");
                Ok(State::LoggedOut)
            }
            Err(CredentialError::MissingInput) => {
                console.notice(NoticeKind::Error, "All fields are required.");
                Ok(State::LoggedOut)
            }
            Err(CredentialError::DuplicateUsername(_)) => {
                console.notice(NoticeKind::Error, "Username already exists.");
                Ok(State::Registering)
            }
            Err(e) => {
                tracing::error!(error = %e, "registration failed");
                console.notice(NoticeKind::Error, &e.to_string());
                Ok(State::LoggedOut)
            }
        }
    }

    fn dashboard(&mut self, console: &mut dyn Console) -> io::Result<State> {
        Ok(match console.choose("Dashboard", &DASHBOARD_MENU)? {
            Some(0) => State::Recognizing,
            Some(1) => State::Enrolling,
            Some(2) => State::Viewing,
            _ => State::Exit,
        })
    }

    fn enrolling(&mut self, console: &mut dyn Console) -> io::Result<State> {
        let Some(name) = console.prompt("Name")? else {
            return Ok(State::Exit);
        };
        let name = name.trim().to_string();
        if name.is_empty() {
            console.notice(NoticeKind::Error, "Enter a name.");
            return Ok(State::Dashboard);
        }

        let Some(detector) = self.load_detector(console) else {
            return Ok(State::Dashboard);
        };

        let templates = &self.templates;
        let mut end = None;
        let opened = self.devices.capture(&mut |source| {
            end = Some(enroll_loop(source, console, detector.as_ref(), templates, &name));
        });

        match finish(opened, end) {
            CaptureEnd::Saved => {
                console.notice(NoticeKind::Info, &format!("Face for '{name}' saved successfully!"));
            }
            CaptureEnd::Cancelled => {
                console.notice(NoticeKind::Warning, "No face captured.");
            }
            CaptureEnd::StreamEnded(e) => {
                tracing::warn!(name, error = %e, "camera stopped during enrollment");
                console.notice(NoticeKind::Warning, "No face captured.");
            }
            CaptureEnd::Failed(message) => {
                tracing::error!(name, error = %message, "enrollment failed");
                console.notice(NoticeKind::Error, &message);
            }
        }
        Ok(State::Dashboard)
    }

    fn recognizing(&mut self, console: &mut dyn Console) -> io::Result<State> {
        let gallery = match self.templates.load_all() {
            Ok(gallery) => gallery,
            Err(TemplateError::EmptyStore(_)) => {
                console.notice(NoticeKind::Error, "No images found in faces folder.");
                return Ok(State::Dashboard);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load templates");
                console.notice(NoticeKind::Error, &e.to_string());
                return Ok(State::Dashboard);
            }
        };

        let Some(detector) = self.load_detector(console) else {
            return Ok(State::Dashboard);
        };

        tracing::info!(templates = gallery.len(), "attendance started");
        let recognizer = FaceRecognizer::new(detector.as_ref(), &self.matcher, gallery);
        let log = &self.attendance;
        let marked = &mut self.marked;
        let before = marked.len();
        let mut end = None;
        let opened = self.devices.capture(&mut |source| {
            end = Some(recognize_loop(source, console, &recognizer, log, marked));
        });

        match finish(opened, end) {
            CaptureEnd::StreamEnded(e) => {
                tracing::warn!(error = %e, "camera stopped during attendance");
            }
            CaptureEnd::Failed(message) => {
                tracing::error!(error = %message, "attendance loop failed");
                console.notice(NoticeKind::Error, &message);
            }
            CaptureEnd::Saved | CaptureEnd::Cancelled => {}
        }

        let newly = self.marked.len() - before;
        tracing::info!(newly_marked = newly, "attendance stopped");
        console.notice(
            NoticeKind::Info,
            &format!("Attendance stopped: {newly} newly marked."),
        );
        Ok(State::Dashboard)
    }

    fn viewing(&mut self, console: &mut dyn Console) -> io::Result<State> {
        match self.attendance.load_all() {
            Ok(records) => console.show_table(&records),
            Err(AttendanceError::NotFound(_)) => {
                console.notice(NoticeKind::Error, "attendance file not found");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read attendance");
                console.notice(NoticeKind::Error, &e.to_string());
            }
        }
        Ok(State::Dashboard)
    }

    fn load_detector(&self, console: &mut dyn Console) -> Option<Box<dyn FaceDetector>> {
        match self.devices.detector() {
            Ok(detector) => Some(detector),
            Err(e) => {
                tracing::error!(error = %e, "face detector unavailable");
                console.notice(NoticeKind::Error, &format!("Face detector unavailable: {e}"));
                None
            }
        }
    }
}

fn finish(opened: Result<(), CameraError>, end: Option<CaptureEnd>) -> CaptureEnd {
    match opened {
        Ok(()) => end.unwrap_or(CaptureEnd::Cancelled),
        Err(e) => CaptureEnd::StreamEnded(e),
    }
}

/// Read frames until a face is saved as `name`'s template or the operator cancels.
fn enroll_loop(
    source: &mut dyn FrameSource,
    console: &mut dyn Console,
    detector: &dyn FaceDetector,
    templates: &TemplateStore,
    name: &str,
) -> CaptureEnd {
    let mut preview = match Preview::begin(console) {
        Ok(preview) => preview,
        Err(e) => return CaptureEnd::Failed(format!("Camera preview unavailable: {e}")),
    };
    let status = format!("Enrolling '{name}': face the camera");

    loop {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => return CaptureEnd::StreamEnded(e),
        };

        let (overlays, saved) = match templates.save(name, &frame.image, detector) {
            Ok(region) => (vec![Overlay::new(region, Some(name))], true),
            Err(TemplateError::NoFaceDetected) => (Vec::new(), false),
            Err(e) => return CaptureEnd::Failed(e.to_string()),
        };

        if let Err(e) = preview.show(&frame.image, &overlays, &status) {
            return CaptureEnd::Failed(e.to_string());
        }
        if saved {
            return CaptureEnd::Saved;
        }
        match preview.cancel_requested() {
            Ok(true) => return CaptureEnd::Cancelled,
            Ok(false) => {}
            Err(e) => return CaptureEnd::Failed(e.to_string()),
        }
    }
}

/// Match every face in every frame and log first sightings until the operator stops.
fn recognize_loop(
    source: &mut dyn FrameSource,
    console: &mut dyn Console,
    recognizer: &FaceRecognizer<'_>,
    log: &AttendanceLog,
    marked: &mut MarkedSet,
) -> CaptureEnd {
    let mut preview = match Preview::begin(console) {
        Ok(preview) => preview,
        Err(e) => return CaptureEnd::Failed(format!("Camera preview unavailable: {e}")),
    };
    let mut status = String::from("Taking attendance");

    loop {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => return CaptureEnd::StreamEnded(e),
        };

        let found = recognizer.recognize(&frame.image);
        let mut overlays = Vec::with_capacity(found.len());
        for recognition in &found {
            if let Some(name) = recognition.name() {
                match log.mark_if_new_now(marked, name) {
                    Ok(Some(record)) => {
                        status = format!("Marked {name} present at {}", record.time);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        return CaptureEnd::Failed(format!(
                            "Could not record attendance for {name}: {e}"
                        ));
                    }
                }
            }
            overlays.push(Overlay::new(recognition.region, recognition.name()));
        }

        if let Err(e) = preview.show(&frame.image, &overlays, &status) {
            return CaptureEnd::Failed(e.to_string());
        }
        match preview.cancel_requested() {
            Ok(true) => return CaptureEnd::Cancelled,
            Ok(false) => {}
            Err(e) => return CaptureEnd::Failed(e.to_string()),
        }
    }
}
