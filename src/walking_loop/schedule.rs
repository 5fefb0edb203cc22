use bevy::{
    app::MainScheduleOrder,
    ecs::schedule::ScheduleLabel,
    prelude::*,
};
use tracing::error;

use crate::types::{ModelJointVector, VelocityReference};

use super::WalkingLoop;

/// Runs directly after [`First`]; systems here refresh [`MeasuredJoints`] and
/// [`VelocityCommand`] from whatever transport is wired up by the caller.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Sensor;

/// Runs the closed-loop tick: pattern generation, interpolation, IK.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PreWrite;

/// Runs after [`PreWrite`]; systems here publish [`LatestTickOutput`] to the
/// joint-out transport.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Write;

/// Runs after [`Write`], for systems depending on the freshly published command.
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PostWrite;

/// Latest joint vector read back from the robot, refreshed in [`Sensor`].
#[derive(Resource, Default)]
pub struct MeasuredJoints(pub Option<ModelJointVector>);

/// Latest velocity reference, refreshed in [`Sensor`].
#[derive(Resource, Default)]
pub struct VelocityCommand(pub Option<VelocityReference>);

/// Output of the most recent tick, consumed by [`Write`] systems.
#[derive(Resource, Default)]
pub struct LatestTickOutput(pub Option<super::TickOutput>);

/// Wires [`WalkingLoop`] into a custom four-stage schedule ordering, matching
/// how sensor-read / control / write / post-write phases are separated on
/// the real robot bus.
pub struct WalkingLoopPlugin;

impl Plugin for WalkingLoopPlugin {
    fn build(&self, app: &mut App) {
        app.world_mut()
            .resource_scope(|_, mut schedule: Mut<MainScheduleOrder>| {
                schedule.insert_after(First, Sensor);
                schedule.insert_after(PostUpdate, PreWrite);
                schedule.insert_after(PreWrite, Write);
                schedule.insert_after(Write, PostWrite);
            });

        app.init_resource::<MeasuredJoints>()
            .init_resource::<VelocityCommand>()
            .init_resource::<LatestTickOutput>()
            .add_systems(PreWrite, tick_system);
    }
}

fn tick_system(
    mut walking_loop: ResMut<WalkingLoop>,
    measured: Res<MeasuredJoints>,
    velocity: Res<VelocityCommand>,
    mut output: ResMut<LatestTickOutput>,
) {
    match walking_loop.tick(measured.0, velocity.0) {
        Ok(tick_output) => output.0 = Some(tick_output),
        Err(err) => {
            error!(error = %err, "walking loop tick failed");
            output.0 = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KinematicsConfig, PatternGeneratorConfig};

    #[test]
    fn plugin_wiring_populates_tick_output_resource() {
        let mut walking_loop = WalkingLoop::new(PatternGeneratorConfig::default(), KinematicsConfig::default());
        walking_loop.connect();
        walking_loop.begin_initializing();
        walking_loop.finish_initializing();

        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .add_plugins(WalkingLoopPlugin)
            .insert_resource(walking_loop)
            .insert_resource(VelocityCommand(Some(VelocityReference {
                vx: 0.1,
                vy: 0.0,
                vyaw: 0.0,
            })));

        for _ in 0..5 {
            app.update();
        }

        let output = app.world().resource::<LatestTickOutput>();
        assert!(output.0.is_some(), "expected a tick output after 5 updates");
    }
}
