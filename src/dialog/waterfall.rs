use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::{
    ConversationState, DialogFrame, DialogOptions, PendingPrompt, ReplyRecognizer, StepOutcome,
    StepValue,
};
use crate::activity::Activity;

/// Upper bound on steps executed in a single turn.
pub const MAX_STEPS_PER_TURN: usize = 64;

/// A step borrows its context for the duration of the returned future.
pub type StepFn<C, S> =
    for<'r, 'c> fn(&'r mut StepContext<'c, C, S>) -> BoxFuture<'r, anyhow::Result<StepOutcome>>;

pub struct Step<C, S> {
    pub name: &'static str,
    pub run: StepFn<C, S>,
}

impl<C, S> Step<C, S> {
    pub fn new(name: &'static str, run: StepFn<C, S>) -> Self {
        Self { name, run }
    }
}

pub struct Waterfall<C, S> {
    pub id: String,
    pub steps: Vec<Step<C, S>>,
}

impl<C, S> Waterfall<C, S> {
    pub fn new(id: &str, steps: Vec<Step<C, S>>) -> Self {
        Self {
            id: id.to_string(),
            steps,
        }
    }
}

/// What a running step can see and touch.
pub struct StepContext<'c, C, S> {
    pub services: &'c C,
    pub activity: &'c Activity,
    /// Turn clock. Fixed for the whole turn.
    pub now: DateTime<Utc>,
    /// Options the current dialog was started with.
    pub options: DialogOptions,
    /// Value from the previous step, a finished child, or a prompt reply.
    pub result: StepValue,
    pub values: &'c mut S,
    outbox: &'c mut Vec<Activity>,
}

impl<'c, C, S> StepContext<'c, C, S> {
    pub fn send(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.outbox.push(Activity::message(&text));
    }

    pub fn send_activity(&mut self, activity: Activity) {
        self.outbox.push(activity);
    }

    pub fn locale(&self) -> &str {
        self.activity.locale.as_deref().unwrap_or("en-us")
    }

    /// Takes the incoming result, leaving `StepValue::None`.
    pub fn take_result(&mut self) -> StepValue {
        std::mem::take(&mut self.result)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnStatus {
    /// Suspended on a prompt.
    Waiting,
    /// The root dialog ended.
    Complete(StepValue),
    Cancelled,
    /// A step failed. State was rolled back to the checkpoint taken
    /// before that step.
    Faulted(String),
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub activities: Vec<Activity>,
}

/// Registry of dialogs plus the interpreter that runs them.
pub struct DialogSet<C, S> {
    dialogs: HashMap<String, Waterfall<C, S>>,
    replies: ReplyRecognizer,
}

impl<C, S> DialogSet<C, S>
where
    C: Sync,
    S: Clone + Default + Send,
{
    pub fn new(replies: ReplyRecognizer) -> Self {
        Self {
            dialogs: HashMap::new(),
            replies,
        }
    }

    pub fn add(&mut self, dialog: Waterfall<C, S>) {
        self.dialogs.insert(dialog.id.clone(), dialog);
    }

    /// Pushes `dialog_id` on top of the stack and runs until the turn
    /// suspends or finishes.
    pub async fn begin(
        &self,
        services: &C,
        state: &mut ConversationState<S>,
        activity: &Activity,
        now: DateTime<Utc>,
        dialog_id: &str,
        options: DialogOptions,
    ) -> TurnOutcome {
        debug!("Begin dialog {dialog_id}");
        state.stack.push(DialogFrame::new(dialog_id, options));
        self.drive(services, state, activity, now, StepValue::None, Vec::new())
            .await
    }

    /// Resumes the active frame with the incoming activity. A pending
    /// prompt is answered first; a reply that does not fit re-sends the
    /// retry text and leaves the frame where it was.
    pub async fn resume(
        &self,
        services: &C,
        state: &mut ConversationState<S>,
        activity: &Activity,
        now: DateTime<Utc>,
    ) -> TurnOutcome {
        let locale = activity.locale.as_deref().unwrap_or("en-us");
        let Some(frame) = state.stack.last_mut() else {
            return TurnOutcome {
                status: TurnStatus::Complete(StepValue::None),
                activities: Vec::new(),
            };
        };

        let result = match &frame.pending {
            Some(pending) => {
                match self
                    .replies
                    .recognize(&pending.kind, activity.text(), locale, now)
                {
                    Some(value) => {
                        frame.pending = None;
                        value
                    }
                    None => {
                        debug!("Reply not recognized for {:?}, re-prompting", pending.kind);
                        return TurnOutcome {
                            status: TurnStatus::Waiting,
                            activities: vec![Activity::message(&pending.retry_text)],
                        };
                    }
                }
            }
            None => StepValue::Text(activity.text().to_string()),
        };

        self.drive(services, state, activity, now, result, Vec::new())
            .await
    }

    async fn drive(
        &self,
        services: &C,
        state: &mut ConversationState<S>,
        activity: &Activity,
        now: DateTime<Utc>,
        mut result: StepValue,
        mut outbox: Vec<Activity>,
    ) -> TurnOutcome {
        let mut executed = 0usize;

        loop {
            let Some(frame) = state.stack.last() else {
                return TurnOutcome {
                    status: TurnStatus::Complete(result),
                    activities: outbox,
                };
            };

            let Some(dialog) = self.dialogs.get(&frame.dialog_id) else {
                error!("Unknown dialog {}", frame.dialog_id);
                return TurnOutcome {
                    status: TurnStatus::Faulted(format!("unknown dialog {}", frame.dialog_id)),
                    activities: outbox,
                };
            };

            // Falling off the end of a waterfall ends it.
            let Some(step) = dialog.steps.get(frame.next_step) else {
                state.stack.pop();
                continue;
            };

            executed += 1;
            if executed > MAX_STEPS_PER_TURN {
                warn!("Step limit reached in {}", dialog.id);
                return TurnOutcome {
                    status: TurnStatus::Faulted("step limit reached".to_string()),
                    activities: outbox,
                };
            }

            let checkpoint = state.clone();
            let mark = outbox.len();
            let options = frame.options.clone();
            debug!("Step {}::{}", dialog.id, step.name);

            let outcome = {
                let mut cx = StepContext {
                    services,
                    activity,
                    now,
                    options,
                    result: std::mem::take(&mut result),
                    values: &mut state.values,
                    outbox: &mut outbox,
                };
                (step.run)(&mut cx).await
            };

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Step {}::{} failed: {e:#}", dialog.id, step.name);
                    *state = checkpoint;
                    outbox.truncate(mark);
                    return TurnOutcome {
                        status: TurnStatus::Faulted(e.to_string()),
                        activities: outbox,
                    };
                }
            };

            match outcome {
                StepOutcome::Next(value) => {
                    advance(state);
                    result = value;
                }
                StepOutcome::End(value) => {
                    state.stack.pop();
                    result = value;
                }
                StepOutcome::Begin { dialog, options } => {
                    advance(state);
                    state.stack.push(DialogFrame::new(&dialog, options));
                }
                StepOutcome::Prompt(prompt) => {
                    if let Some(top) = state.stack.last_mut() {
                        top.next_step += 1;
                        top.pending = Some(PendingPrompt {
                            kind: prompt.kind,
                            retry_text: prompt.retry.unwrap_or_else(|| prompt.text.clone()),
                        });
                    }
                    outbox.push(Activity::message(&prompt.text));
                    return TurnOutcome {
                        status: TurnStatus::Waiting,
                        activities: outbox,
                    };
                }
                StepOutcome::Replace { dialog, options } => {
                    state.stack.pop();
                    state.stack.push(DialogFrame::new(&dialog, options));
                }
                StepOutcome::CancelAll => {
                    state.stack.clear();
                    return TurnOutcome {
                        status: TurnStatus::Cancelled,
                        activities: outbox,
                    };
                }
            }
        }
    }
}

fn advance<S>(state: &mut ConversationState<S>) {
    if let Some(top) = state.stack.last_mut() {
        top.next_step += 1;
    }
}
