//! The orchestration state machine.
//!
//! A cooperative loop over a closed set of states: classify the page, do one
//! unit of work, record a transition, adopt the returned state. The loop
//! detector runs before every step and can force a recovery checkpoint or a
//! hand-off to a human; a hard transition cap backstops everything.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::browser::{click_with_escalation, Page};
use crate::checkpoint;
use crate::classifier::{ButtonIntent, CheckpointDecision, Classifier, PageType};
use crate::detect::{buttons, sensitive};
use crate::dom;
use crate::fill::FormFiller;
use crate::loopdetect::{LoopDetector, LoopVerdict};
use crate::profile::Profile;
use crate::tracker::CompletionTracker;
use crate::types::{
    RunContext, RunOutcome, StateId, Transition, MAX_CHECKPOINT_ATTEMPTS, MAX_TRANSITIONS,
};

pub struct Engine {
    page: Arc<dyn Page>,
    classifier: Arc<dyn Classifier>,
    profile: Profile,
    tracker: CompletionTracker,
    detector: LoopDetector,
}

impl Engine {
    pub fn new(page: Arc<dyn Page>, classifier: Arc<dyn Classifier>, profile: Profile) -> Self {
        Self {
            page,
            classifier,
            profile,
            tracker: CompletionTracker::new(),
            detector: LoopDetector::new(),
        }
    }

    /// Drive one application run to a terminal state. Never panics out of a
    /// handler: any handler error is caught here and routed to `fail` so no
    /// iteration runs against an undefined state.
    pub async fn run(&mut self, job_url: &str) -> RunContext {
        let mut ctx = RunContext::new(job_url);

        if let Err(e) = self.page.navigate(job_url).await {
            error!(error = %e, url = job_url, "initial navigation failed");
            ctx.note_failure(format!("navigation failed: {e:#}"));
            ctx.current = StateId::Fail;
            let _ = self.dispatch(StateId::Fail, &mut ctx).await;
            return ctx;
        }

        let mut current = ctx.current;
        loop {
            // Runaway prevention: halt outright once the cap is reached.
            if !current.is_terminal() && ctx.history.len() >= MAX_TRANSITIONS {
                warn!(
                    cap = MAX_TRANSITIONS,
                    "transition cap exceeded, halting run"
                );
                ctx.note_failure(format!("runaway halt: {MAX_TRANSITIONS} transitions"));
                current = StateId::Fail;
            }

            // Loop/stagnation check. Skipped while already recovering so the
            // checkpoint and hand-off states get to act.
            if !current.is_terminal()
                && !matches!(
                    current,
                    StateId::FinalCheckpoint | StateId::HumanIntervention
                )
            {
                match self.detector.check(&ctx.history, ctx.checkpoint_attempts) {
                    LoopVerdict::Stuck(reason) => {
                        warn!(reason = %reason, "loop detector declared run stuck");
                        ctx.stuck_reason = Some(reason);
                        current = StateId::HumanIntervention;
                    }
                    LoopVerdict::Stagnating => {
                        info!(
                            attempt = ctx.checkpoint_attempts + 1,
                            max = MAX_CHECKPOINT_ATTEMPTS,
                            "stagnation suspected, probing checkpoint"
                        );
                        current = StateId::FinalCheckpoint;
                    }
                    LoopVerdict::Healthy => {}
                }
            }

            if current.is_terminal() {
                ctx.current = current;
                // Terminal handler runs once more for final bookkeeping.
                if let Err(e) = self.dispatch(current, &mut ctx).await {
                    error!(error = %e, "terminal handler failed");
                }
                return ctx;
            }

            debug!(state = current.name(), step = ctx.history.len(), "entering state");
            let next = match self.dispatch(current, &mut ctx).await {
                Ok(Some(next)) => next,
                Ok(None) => {
                    error!(state = current.name(), "state returned no successor");
                    ctx.note_failure(format!("state {} returned no successor", current.name()));
                    StateId::Fail
                }
                Err(e) => {
                    error!(state = current.name(), error = %format!("{e:#}"), "state handler failed");
                    ctx.note_failure(format!("{} failed: {e:#}", current.name()));
                    StateId::Fail
                }
            };

            let url = self
                .page
                .current_url()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            let progress_made = ctx.flags.drain();
            ctx.history.push(Transition {
                from: current,
                to: next,
                url,
                progress_made,
                fields_filled: ctx.fields_filled,
            });
            ctx.current = next;
            current = next;
        }
    }

    /// Closed dispatch table over the state set; exhaustiveness is checked
    /// by the compiler.
    async fn dispatch(&mut self, state: StateId, ctx: &mut RunContext) -> Result<Option<StateId>> {
        match state {
            StateId::ClassifyPage => self.classify_page(ctx).await,
            StateId::HandleApply => self.handle_apply(ctx).await,
            StateId::FillForm => self.fill_form(ctx).await,
            StateId::HandleAuth => self.handle_auth(ctx).await,
            StateId::HandlePopup => self.handle_popup(ctx).await,
            StateId::FinalCheckpoint => self.final_checkpoint(ctx).await,
            StateId::HumanIntervention => self.human_intervention(ctx).await,
            StateId::Success => self.finish_success(ctx).await,
            StateId::Fail => self.finish_fail(ctx).await,
        }
    }

    async fn classify_page(&mut self, _ctx: &mut RunContext) -> Result<Option<StateId>> {
        let snap = dom::snapshot(self.page.as_ref()).await?;
        let decision = match self.classifier.classify_page(&snap).await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "page classifier unavailable, using rules");
                crate::classifier::classify_by_rules(&snap)
            }
        };
        info!(
            page_type = ?decision.page_type,
            confidence = decision.confidence,
            reason = %decision.reason,
            "page classified"
        );

        let next = match decision.page_type {
            PageType::Listing => StateId::HandleApply,
            PageType::ApplicationForm => StateId::FillForm,
            PageType::Auth => StateId::HandleAuth,
            PageType::Popup => StateId::HandlePopup,
            PageType::Submitted => StateId::Success,
            PageType::Error => StateId::Fail,
            PageType::Unknown => {
                if snap.fields.is_empty() {
                    StateId::HandleApply
                } else {
                    StateId::FillForm
                }
            }
        };
        Ok(Some(next))
    }

    async fn handle_apply(&mut self, ctx: &mut RunContext) -> Result<Option<StateId>> {
        match buttons::find_button(
            self.page.as_ref(),
            self.classifier.as_ref(),
            ButtonIntent::Apply,
        )
        .await?
        {
            Some(button) => {
                match click_with_escalation(self.page.as_ref(), &button.selector).await {
                    Ok(()) => {
                        info!(text = %button.text, "clicked apply");
                        ctx.flags.progress_made = true;
                    }
                    Err(e) => warn!(text = %button.text, error = %e, "apply click failed"),
                }
            }
            None => debug!("no apply button on this page"),
        }
        Ok(Some(StateId::ClassifyPage))
    }

    async fn fill_form(&mut self, ctx: &mut RunContext) -> Result<Option<StateId>> {
        let filler = FormFiller {
            page: self.page.as_ref(),
            classifier: self.classifier.as_ref(),
            profile: &self.profile,
        };
        let summary = filler.fill_pass(&mut self.tracker).await?;

        ctx.fields_filled += summary.filled;
        for label in summary.skipped {
            if !ctx.skipped_fields.contains(&label) {
                ctx.skipped_fields.push(label);
            }
        }
        if let Some(reason) = summary.needs_human {
            ctx.stuck_reason = Some(reason);
            return Ok(Some(StateId::HumanIntervention));
        }
        if summary.filled > 0 {
            ctx.flags.progress_made = true;
        }

        // Advance the flow: submit when possible, otherwise next step.
        let advance = match buttons::find_button(
            self.page.as_ref(),
            self.classifier.as_ref(),
            ButtonIntent::Submit,
        )
        .await?
        {
            Some(b) => Some(b),
            None => {
                buttons::find_button(
                    self.page.as_ref(),
                    self.classifier.as_ref(),
                    ButtonIntent::Next,
                )
                .await?
            }
        };
        if let Some(button) = advance {
            match click_with_escalation(self.page.as_ref(), &button.selector).await {
                Ok(()) => {
                    info!(text = %button.text, "advanced form flow");
                    ctx.flags.progress_made = true;
                }
                Err(e) => warn!(text = %button.text, error = %e, "advance click failed"),
            }
        }
        Ok(Some(StateId::ClassifyPage))
    }

    async fn handle_auth(&mut self, ctx: &mut RunContext) -> Result<Option<StateId>> {
        let snap = dom::snapshot(self.page.as_ref()).await?;
        match sensitive::gate(&snap.fields, &snap.text) {
            sensitive::SensitiveVerdict::NeedsHuman(reason) => {
                ctx.stuck_reason = Some(reason);
                Ok(Some(StateId::HumanIntervention))
            }
            // Account creation: the regular fill pipeline may auto-fill
            // credentials from the profile.
            sensitive::SensitiveVerdict::AutoFillCredentials
            | sensitive::SensitiveVerdict::Clear => Ok(Some(StateId::FillForm)),
        }
    }

    async fn handle_popup(&mut self, ctx: &mut RunContext) -> Result<Option<StateId>> {
        match buttons::find_button(
            self.page.as_ref(),
            self.classifier.as_ref(),
            ButtonIntent::DismissPopup,
        )
        .await?
        {
            Some(button) => {
                match click_with_escalation(self.page.as_ref(), &button.selector).await {
                    Ok(()) => {
                        info!(text = %button.text, "popup dismissed");
                        ctx.flags.progress_made = true;
                    }
                    Err(e) => warn!(error = %e, "popup dismiss failed"),
                }
            }
            None => debug!("no dismissable popup control found"),
        }
        Ok(Some(StateId::ClassifyPage))
    }

    async fn final_checkpoint(&mut self, ctx: &mut RunContext) -> Result<Option<StateId>> {
        ctx.checkpoint_attempts += 1;
        let probe = checkpoint::build_probe(
            self.page.as_ref(),
            &self.tracker,
            &self.profile,
            &ctx.skipped_fields,
        )
        .await?;

        match self.classifier.decide_next_action(&probe).await {
            Ok(CheckpointDecision::GreenSignal) => {
                info!("checkpoint returned green signal, accepting current state");
                Ok(Some(StateId::Success))
            }
            Ok(decision) => {
                match checkpoint::execute(self.page.as_ref(), &mut self.tracker, &decision).await {
                    Ok(acted) => {
                        if acted {
                            ctx.flags.progress_made = true;
                        }
                    }
                    Err(e) => warn!(error = %e, "checkpoint instruction failed"),
                }
                Ok(Some(StateId::ClassifyPage))
            }
            Err(e) => {
                warn!(error = %e, "checkpoint decision unavailable");
                Ok(Some(StateId::ClassifyPage))
            }
        }
    }

    async fn human_intervention(&mut self, ctx: &mut RunContext) -> Result<Option<StateId>> {
        let reason = ctx
            .stuck_reason
            .clone()
            .unwrap_or_else(|| "unspecified".to_string());
        warn!(reason = %reason, "handing off to a human operator");
        self.save_screenshot("needs-human", ctx).await;
        ctx.outcome = Some(RunOutcome::NeedsHuman { reason });
        Ok(Some(StateId::Fail))
    }

    async fn finish_success(&mut self, ctx: &mut RunContext) -> Result<Option<StateId>> {
        ctx.outcome = Some(RunOutcome::Success);
        info!(
            fields_filled = ctx.fields_filled,
            transitions = ctx.history.len(),
            "application run succeeded"
        );
        Ok(None)
    }

    async fn finish_fail(&mut self, ctx: &mut RunContext) -> Result<Option<StateId>> {
        // A hand-off outcome set by human_intervention is preserved.
        ctx.note_failure("run failed");
        self.save_screenshot("failed", ctx).await;
        info!(
            outcome = ?ctx.outcome,
            fields_filled = ctx.fields_filled,
            transitions = ctx.history.len(),
            "application run ended without submission"
        );
        Ok(None)
    }

    /// Best-effort screenshot for the operator trail; never fails the run.
    async fn save_screenshot(&self, tag: &str, ctx: &mut RunContext) {
        match self.page.screenshot_png().await {
            Ok(png) if !png.is_empty() => {
                let path = std::env::temp_dir().join(format!(
                    "autoapply-{tag}-{}.png",
                    std::process::id()
                ));
                if std::fs::write(&path, png).is_ok() {
                    info!(path = %path.display(), "screenshot saved");
                    ctx.vars.insert(
                        "screenshot".to_string(),
                        serde_json::Value::String(path.display().to_string()),
                    );
                }
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "screenshot capture failed"),
        }
    }
}
