//! In-flight state of one generation attempt.
//!
//! Stages advance strictly forward: planning, data acquisition, widget
//! generation, validating, complete. `Failed` absorbs from any non-terminal
//! stage and is never reported to callers; the orchestrator turns it into a
//! fallback attempt instead.

use std::fmt;

use thiserror::Error;

use crate::core::types::{DataResult, Plan, Widget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Planning,
    DataAcquisition,
    WidgetGeneration,
    Validating,
    Complete,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::DataAcquisition => "data-acquisition",
            Stage::WidgetGeneration => "widget-generation",
            Stage::Validating => "validating",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} during {stage}")]
pub struct TransitionError {
    pub stage: Stage,
    pub action: &'static str,
}

/// Accumulated plan, data and widget of a single pipeline attempt.
#[derive(Debug, Clone)]
pub struct Generation {
    stage: Stage,
    plan: Option<Plan>,
    data: Option<DataResult>,
    widget: Option<Widget>,
}

impl Generation {
    pub fn new() -> Self {
        Self {
            stage: Stage::Planning,
            plan: None,
            data: None,
            widget: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn widget(&self) -> Option<&Widget> {
        self.widget.as_ref()
    }

    pub fn record_plan(&mut self, plan: Plan) -> Result<(), TransitionError> {
        self.advance(Stage::Planning, Stage::DataAcquisition, "record a plan")?;
        self.plan = Some(plan);
        Ok(())
    }

    pub fn record_data(&mut self, data: DataResult) -> Result<(), TransitionError> {
        self.advance(Stage::DataAcquisition, Stage::WidgetGeneration, "record data")?;
        self.data = Some(data);
        Ok(())
    }

    pub fn record_widget(&mut self, widget: Widget) -> Result<(), TransitionError> {
        self.advance(Stage::WidgetGeneration, Stage::Validating, "record a widget")?;
        self.widget = Some(widget);
        Ok(())
    }

    /// Finish validation and hand out the widget with its data provenance.
    pub fn complete(&mut self) -> Result<(Widget, Option<String>), TransitionError> {
        let error = TransitionError {
            stage: self.stage,
            action: "complete",
        };
        if self.stage != Stage::Validating {
            return Err(error);
        }
        let widget = self.widget.clone().ok_or(error)?;
        let source = self.data.as_ref().and_then(|d| d.source.clone());
        self.stage = Stage::Complete;
        Ok((widget, source))
    }

    /// Mark the attempt failed. Returns the stage it failed in.
    pub fn fail(&mut self) -> Stage {
        let failed_in = self.stage;
        if !self.stage.is_terminal() {
            self.stage = Stage::Failed;
        }
        failed_in
    }

    fn advance(
        &mut self,
        expected: Stage,
        next: Stage,
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if self.stage != expected {
            return Err(TransitionError {
                stage: self.stage,
                action,
            });
        }
        self.stage = next;
        Ok(())
    }
}

impl Default for Generation {
    fn default() -> Self {
        Self::new()
    }
}
