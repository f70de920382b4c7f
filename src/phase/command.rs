//! Command phase: command points and start-of-turn upkeep.

use crate::core::rng::DiceStream;
use crate::game::action::Command;
use crate::game::diff::{player_field, Diff};
use crate::game::error::ActionError;
use crate::game::state::{flags, PhaseKind, PlayerId};

use super::{not_in_phase, unsupported, Phase, PhaseContext, PhaseOutput, Validation};

/// Command phase. Has no actions of its own.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandPhase;

impl Phase for CommandPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Command
    }

    fn enter(&mut self, ctx: &PhaseContext<'_>) -> PhaseOutput {
        let state = ctx.state;
        let active = state.active_player;
        let mut diffs = Vec::new();

        if let Some(record) = state.player(active) {
            diffs.push(Diff::set(
                player_field(active, "command_points"),
                record.command_points + ctx.config.command_points_per_turn,
            ));
        }

        for unit in state.units.values() {
            for flag in flags::PER_TURN {
                if unit.has_flag(flag) {
                    diffs.push(Diff::clear_flag(&unit.id, flag));
                }
            }
            // Battle-shock wears off at the start of the owner's turn
            if unit.owner == active && unit.has_flag(flags::BATTLE_SHOCKED) {
                diffs.push(Diff::clear_flag(&unit.id, flags::BATTLE_SHOCKED));
            }
        }

        PhaseOutput::complete(diffs, Vec::new())
    }

    fn validate(&self, _ctx: &PhaseContext<'_>, _player: PlayerId, command: &Command) -> Validation {
        not_in_phase(self.kind(), command)
    }

    fn process(
        &mut self,
        _ctx: &PhaseContext<'_>,
        _player: PlayerId,
        command: &Command,
        _dice: Option<&mut DiceStream>,
    ) -> Result<PhaseOutput, ActionError> {
        Err(unsupported(self.kind(), command))
    }

    fn is_complete(&self, _ctx: &PhaseContext<'_>) -> bool {
        true
    }
}
