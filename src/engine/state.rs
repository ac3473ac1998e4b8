use crate::error::PlayerError;
use crate::models::{CommandKind, PlayerState};

/// Check whether `command` may run while the session is in `state`.
///
/// `Release` is accepted everywhere (it is idempotent). A second data source
/// needs a fresh session, so `SetDataSource` past `Initialized` is an invalid
/// operation rather than a state error.
pub fn check_command(command: CommandKind, state: PlayerState) -> Result<(), PlayerError> {
    use CommandKind::*;
    use PlayerState::*;

    let allowed = match command {
        Release => true,
        _ if state == Released => false,
        SetDataSource => {
            if !matches!(state, Idle | Initialized) {
                return Err(PlayerError::InvalidOperation {
                    command,
                    reason: format!("a data source is already open ({}); release and create a new player", state),
                });
            }
            true
        }
        SetSurface => true,
        Prepare => state == Initialized,
        Start => matches!(state, Prepared | Paused),
        Pause => state == Started,
        SeekTo => matches!(state, Prepared | Started | Paused),
    };

    if allowed {
        Ok(())
    } else {
        Err(PlayerError::IllegalState { command, state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed_states(command: CommandKind) -> Vec<PlayerState> {
        PlayerState::ALL
            .iter()
            .copied()
            .filter(|state| check_command(command, *state).is_ok())
            .collect()
    }

    #[test]
    fn test_allowed_states_per_command() {
        use PlayerState::*;
        assert_eq!(allowed_states(CommandKind::SetDataSource), vec![Idle, Initialized]);
        assert_eq!(allowed_states(CommandKind::Prepare), vec![Initialized]);
        assert_eq!(allowed_states(CommandKind::Start), vec![Prepared, Paused]);
        assert_eq!(allowed_states(CommandKind::Pause), vec![Started]);
        assert_eq!(allowed_states(CommandKind::SeekTo), vec![Prepared, Started, Paused]);
        assert_eq!(allowed_states(CommandKind::Release), PlayerState::ALL.to_vec());
        assert_eq!(
            allowed_states(CommandKind::SetSurface),
            vec![Idle, Initialized, Preparing, Prepared, Started, Paused, Stopped]
        );
    }

    #[test]
    fn test_rejections_name_command_and_state() {
        match check_command(CommandKind::Start, PlayerState::Idle) {
            Err(PlayerError::IllegalState { command, state }) => {
                assert_eq!(command, CommandKind::Start);
                assert_eq!(state, PlayerState::Idle);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_second_data_source_is_invalid_operation() {
        for state in [PlayerState::Preparing, PlayerState::Prepared, PlayerState::Started, PlayerState::Stopped] {
            assert!(matches!(
                check_command(CommandKind::SetDataSource, state),
                Err(PlayerError::InvalidOperation { command: CommandKind::SetDataSource, .. })
            ));
        }
        assert!(matches!(
            check_command(CommandKind::SetDataSource, PlayerState::Released),
            Err(PlayerError::IllegalState { .. })
        ));
    }
}
