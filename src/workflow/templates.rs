//! Built-in workflow templates
//!
//! Ready-made documents for the coffee cell: a basic brew, an iced variant
//! and the cup cleaning cycle. Step ids are fixed so fallbacks and jumps can
//! be wired onto a template after it is instantiated.

use crate::error::Result;
use crate::runtime::resolver::Resolver;
use crate::workflow::document::WorkflowDocument;
use crate::workflow::steps::Workflow;
use crate::workflow::types::{now_epoch, ActionSpec, Step, StepFlow, StepType, WaitSpec};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Built-in template selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    CoffeeBasic,
    IceCoffee,
    Cleaning,
}

/// Listing row for a template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateInfo {
    pub template: Template,
    pub name: &'static str,
    pub description: &'static str,
    pub step_count: usize,
}

impl Template {
    pub const ALL: [Template; 3] = [Template::CoffeeBasic, Template::IceCoffee, Template::Cleaning];

    /// Identifier used in routes and listings
    pub fn key(&self) -> &'static str {
        match self {
            Template::CoffeeBasic => "coffee_basic",
            Template::IceCoffee => "ice_coffee",
            Template::Cleaning => "cleaning",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|template| template.key() == key)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Template::CoffeeBasic => "Coffee Making Basic",
            Template::IceCoffee => "Ice Coffee Making",
            Template::Cleaning => "Cleaning Cycle",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Template::CoffeeBasic => "Grab a cup, brew and serve",
            Template::IceCoffee => "Basic brew followed by an ice dispense",
            Template::Cleaning => "Dump, wash and put back the used cup",
        }
    }

    pub fn info(&self) -> TemplateInfo {
        TemplateInfo {
            template: *self,
            name: self.name(),
            description: self.description(),
            step_count: self.steps().len(),
        }
    }

    /// Template document with a fresh workflow id
    pub fn document(&self) -> WorkflowDocument {
        WorkflowDocument {
            workflow_id: Uuid::new_v4(),
            workflow_name: self.name().to_string(),
            workflow_version: "1.0".to_string(),
            workflow_description: self.description().to_string(),
            created_at: now_epoch(),
            steps: self.steps(),
        }
    }

    /// Resolve the template into an editable workflow
    pub fn instantiate(&self, resolver: &Resolver) -> Result<Workflow> {
        tracing::info!("📋 Creating workflow from template: {}", self.name());
        self.document().into_workflow(resolver)
    }

    fn steps(&self) -> Vec<Step> {
        match self {
            Template::CoffeeBasic => brew_steps(),
            Template::IceCoffee => {
                let mut steps = brew_steps();
                steps.push(command("add_ice", "Dispense ice into the cup", "IceMaker", "DISPENSE_ICE", 10.0, 15.0));
                steps
            }
            Template::Cleaning => vec![
                program("grab_old_cup", "Grab the used cup", "GrabOldCup.lua"),
                program("dump_old_cup", "Dump the used cup", "DumpOldCup.lua"),
                command("wash_cup", "Wash the cup", "WashingStation", "WASH_CUP", 30.0, 35.0),
                program("place_clean_cup", "Put the clean cup back", "PlaceCleanCup.lua"),
            ],
        }
    }
}

fn brew_steps() -> Vec<Step> {
    vec![
        program("grab_cup", "Grab a cup", "TakeCup.lua"),
        program("place_cup", "Place the cup in the machine", "MoveToMotor.lua"),
        command("start_brewing", "Start the coffee maker", "CoffeeMaker", "START_BREWING", 15.0, 20.0),
        step(
            "wait_brewing",
            "Wait for the brew to finish",
            StepType::Peripheral,
            ActionSpec::Delay { seconds: 120.0 },
            any_response("CoffeeMaker", 120.0),
            130.0,
        ),
        program("take_cup_out", "Take the cup out", "TakeCupOut.lua"),
        program("serve_cup", "Bring the cup to the counter", "ServeCup.lua"),
    ]
}

fn program(id: &str, name: &str, file: &str) -> Step {
    step(
        id,
        name,
        StepType::Motion,
        ActionSpec::RunMotionProgram {
            program_name: file.to_string(),
            completion_timeout: None,
        },
        WaitSpec::MotionComplete,
        5.0,
    )
}

fn command(id: &str, name: &str, device: &str, payload: &str, wait: f64, timeout: f64) -> Step {
    step(
        id,
        name,
        StepType::Peripheral,
        ActionSpec::SendPeripheralCommand {
            device: device.to_string(),
            payload: payload.to_string(),
            encoding: None,
            terminator: None,
        },
        any_response(device, wait),
        timeout,
    )
}

fn any_response(device: &str, timeout: f64) -> WaitSpec {
    WaitSpec::PeripheralResponse {
        device: device.to_string(),
        expected_ascii: None,
        expected_hex: None,
        timeout: Some(timeout),
        prefer_raw: false,
    }
}

fn step(id: &str, name: &str, step_type: StepType, action: ActionSpec, wait: WaitSpec, timeout: f64) -> Step {
    Step {
        id: id.to_string(),
        name: name.to_string(),
        step_type,
        action_config: action,
        wait_config: wait,
        timeout,
        created_at: now_epoch(),
        updated_at: None,
        flow: StepFlow::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeSettings;
    use crate::device::DeviceSet;
    use crate::workflow::validate::validate;
    use std::sync::Arc;

    fn resolver() -> Resolver {
        Resolver::new(Arc::new(DeviceSet::new()), Arc::new(RuntimeSettings::default()))
    }

    #[test]
    fn every_template_resolves_and_validates() {
        for template in Template::ALL {
            let workflow = template.instantiate(&resolver()).unwrap();
            assert_eq!(workflow.name(), template.name());
            assert_eq!(workflow.steps.len(), template.info().step_count);
            assert!(validate(&workflow.steps).is_ok(), "{:?} failed validation", template);
        }
    }

    #[test]
    fn ice_coffee_extends_the_basic_brew() {
        let basic = Template::CoffeeBasic.document();
        let iced = Template::IceCoffee.document();
        assert_eq!(iced.steps.len(), basic.steps.len() + 1);
        let last = iced.steps.last().unwrap();
        assert_eq!(last.id, "add_ice");
        assert_eq!(last.devices(), vec![crate::device::DeviceRef::peripheral("icemaker")]);
    }

    #[test]
    fn keys_round_trip_through_serde() {
        for template in Template::ALL {
            assert_eq!(Template::from_key(template.key()), Some(template));
            assert_eq!(serde_json::to_value(template).unwrap(), template.key());
        }
        assert_eq!(Template::from_key("espresso"), None);
    }

    #[test]
    fn each_document_gets_a_fresh_id() {
        assert_ne!(
            Template::Cleaning.document().workflow_id,
            Template::Cleaning.document().workflow_id
        );
    }
}
