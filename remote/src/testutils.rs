//! Test doubles for [`Launcher`] and [`Interaction`]

use std::collections::VecDeque;
use std::os::unix::process::ExitStatusExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use common::Interaction;

use crate::launcher::{Invocation, Launcher};

type Effect = Box<dyn Fn(&Invocation) + Send + Sync>;

/// Records every invocation instead of running it
#[derive(Default)]
pub struct RecordingLauncher {
    ran: Mutex<Vec<Invocation>>,
    spawned: Mutex<Vec<Invocation>>,
    terminated: AtomicUsize,
    exit_code: i32,
    fail_spawn: bool,
    effect: Option<Effect>,
}

impl RecordingLauncher {
    /// Every run exits with `code`
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Background processes fail to start
    pub fn failing_spawn(mut self) -> Self {
        self.fail_spawn = true;
        self
    }

    /// Call `effect` for every run, e.g. to create the files rsync would have written
    pub fn with_effect(mut self, effect: impl Fn(&Invocation) + Send + Sync + 'static) -> Self {
        self.effect = Some(Box::new(effect));
        self
    }

    pub fn ran(&self) -> Vec<Invocation> {
        self.ran
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn spawned(&self) -> Vec<Invocation> {
        self.spawned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Launcher for RecordingLauncher {
    type Child = usize;

    async fn run(&self, invocation: &Invocation) -> std::io::Result<std::process::ExitStatus> {
        self.ran
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());
        if let Some(effect) = &self.effect {
            effect(invocation);
        }
        Ok(std::process::ExitStatus::from_raw(self.exit_code << 8))
    }

    fn spawn(&self, invocation: &Invocation) -> std::io::Result<Self::Child> {
        if self.fail_spawn {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: not found", invocation.program),
            ));
        }
        let mut spawned = self.spawned.lock().unwrap_or_else(PoisonError::into_inner);
        spawned.push(invocation.clone());
        Ok(spawned.len())
    }

    async fn terminate(&self, _child: Self::Child) -> std::io::Result<()> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Answers prompts from a script and keeps the reported lines
#[derive(Debug, Default)]
pub struct Scripted {
    answers: Mutex<VecDeque<bool>>,
    username: Option<String>,
    reports: Mutex<Vec<String>>,
    questions: AtomicUsize,
}

impl Scripted {
    pub fn with_answers(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(answers);
        self
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of confirmations asked so far
    pub fn questions(&self) -> usize {
        self.questions.load(Ordering::SeqCst)
    }
}

impl Interaction for Scripted {
    fn report(&self, message: &str) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }

    fn confirm(&self, _question: &str) -> anyhow::Result<bool> {
        self.questions.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted answer left"))
    }

    fn username(&self, host: &str) -> anyhow::Result<String> {
        self.username
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no scripted username for {host}"))
    }
}
