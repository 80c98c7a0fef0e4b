use log::info;
use shared::{GameState, ServerReply};

/// Side effects attached to entering particular states.
///
/// Only Login, InGame, Win and Lose have hook points; entering MainMenu or
/// Lobby runs nothing.
pub trait StateHooks {
    fn on_login(&mut self) {}
    fn on_in_game(&mut self) {}
    fn on_win(&mut self) {}
    fn on_lose(&mut self) {}
}

/// Hooks that do nothing
#[derive(Debug, Default)]
pub struct NoHooks;

impl StateHooks for NoHooks {}

/// Holder of the one game state shared by every connection.
///
/// Any state may follow any other. The machine does not talk to clients; the
/// caller broadcasts the value returned by `set_state`.
pub struct GameStateMachine {
    current: GameState,
    hooks: Box<dyn StateHooks>,
    transitions: u64,
}

impl GameStateMachine {
    pub fn new() -> Self {
        Self::with_hooks(Box::new(NoHooks))
    }

    pub fn with_hooks(hooks: Box<dyn StateHooks>) -> Self {
        let current = GameState::Login;
        info!("State: {}", current);
        Self {
            current,
            hooks,
            transitions: 0,
        }
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn StateHooks>) {
        self.hooks = hooks;
    }

    pub fn state(&self) -> GameState {
        self.current
    }

    /// Overwrites the current state and runs the hook of the new one
    pub fn set_state(&mut self, new_state: GameState) -> GameState {
        let previous = std::mem::replace(&mut self.current, new_state);
        self.transitions += 1;
        info!("State: {} -> {}", previous, new_state);

        self.handle_state_change();
        new_state
    }

    fn handle_state_change(&mut self) {
        match self.current {
            GameState::Login => self.hooks.on_login(),
            GameState::InGame => self.hooks.on_in_game(),
            GameState::Win => self.hooks.on_win(),
            GameState::Lose => self.hooks.on_lose(),
            GameState::MainMenu | GameState::Lobby => {}
        }
    }

    /// The `StateChange:<state>` message announcing the current state
    pub fn state_change_message(&self) -> String {
        ServerReply::StateChange(self.current).to_string()
    }

    /// Number of `set_state` calls since start
    pub fn transitions(&self) -> u64 {
        self.transitions
    }
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingHooks {
        calls: Rc<RefCell<Vec<&'static str>>>,
    }

    impl StateHooks for RecordingHooks {
        fn on_login(&mut self) {
            self.calls.borrow_mut().push("login");
        }
        fn on_in_game(&mut self) {
            self.calls.borrow_mut().push("in_game");
        }
        fn on_win(&mut self) {
            self.calls.borrow_mut().push("win");
        }
        fn on_lose(&mut self) {
            self.calls.borrow_mut().push("lose");
        }
    }

    #[test]
    fn test_initial_state_is_login() {
        let machine = GameStateMachine::new();
        assert_eq!(machine.state(), GameState::Login);
        assert_eq!(machine.transitions(), 0);
    }

    #[test]
    fn test_any_state_reachable_from_any_state() {
        let mut machine = GameStateMachine::new();

        for from in GameState::ALL {
            for to in GameState::ALL {
                machine.set_state(from);
                assert_eq!(machine.set_state(to), to);
                assert_eq!(machine.state(), to);
            }
        }
        assert_eq!(machine.transitions(), 72);
    }

    #[test]
    fn test_hooks_fire_per_target_state() {
        let hooks = RecordingHooks::default();
        let calls = Rc::clone(&hooks.calls);
        let mut machine = GameStateMachine::with_hooks(Box::new(hooks));

        for state in GameState::ALL {
            machine.set_state(state);
        }
        // Re-entering the same state runs its hook again
        machine.set_state(GameState::Win);

        assert_eq!(
            *calls.borrow(),
            vec!["login", "in_game", "win", "lose", "win"]
        );
    }

    #[test]
    fn test_state_change_message() {
        let mut machine = GameStateMachine::new();
        assert_eq!(machine.state_change_message(), "StateChange:Login");

        machine.set_state(GameState::InGame);
        assert_eq!(machine.state_change_message(), "StateChange:InGame");
    }
}
