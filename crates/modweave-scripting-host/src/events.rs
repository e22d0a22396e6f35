use std::fmt;

/// Name of the per-tick hook a script may define.
pub const UPDATE_HOOK: &str = "Update";

/// Name of the entry function run once per load generation.
pub const INITIALIZE_HOOK: &str = "Initialize";

/// Host events a script can handle by defining a global function of the same name.
///
/// This is a fixed allow-list; script environments are scanned for exactly
/// these names after every load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HostEvent {
    /// A new in-game day started
    DayChanged,
    /// The in-game clock advanced
    TimeChanged,
    /// The player went to sleep
    SleepStart,
    /// The player woke up
    SleepEnd,
    /// The player entity exists and can be queried
    PlayerReady,
    /// The console accepts command registrations
    ConsoleReady,
    /// Item and entity registries are populated
    RegistryReady,
    /// A scene finished loading
    SceneLoaded,

    // Domain hooks, forwarded from the host unchanged
    /// An item was picked up
    ItemPickedUp,
    /// The player interacted with an NPC
    NpcInteract,
    /// A shop window was opened
    ShopOpened,
    /// A quest changed state
    QuestUpdated,
}

impl HostEvent {
    pub const ALL: [HostEvent; 12] = [
        HostEvent::DayChanged,
        HostEvent::TimeChanged,
        HostEvent::SleepStart,
        HostEvent::SleepEnd,
        HostEvent::PlayerReady,
        HostEvent::ConsoleReady,
        HostEvent::RegistryReady,
        HostEvent::SceneLoaded,
        HostEvent::ItemPickedUp,
        HostEvent::NpcInteract,
        HostEvent::ShopOpened,
        HostEvent::QuestUpdated,
    ];

    /// The global function name a script defines to receive this event.
    pub fn handler_name(self) -> &'static str {
        match self {
            HostEvent::DayChanged => "OnDayChanged",
            HostEvent::TimeChanged => "OnTimeChanged",
            HostEvent::SleepStart => "OnSleepStart",
            HostEvent::SleepEnd => "OnSleepEnd",
            HostEvent::PlayerReady => "OnPlayerReady",
            HostEvent::ConsoleReady => "OnConsoleReady",
            HostEvent::RegistryReady => "OnRegistryReady",
            HostEvent::SceneLoaded => "OnSceneLoaded",
            HostEvent::ItemPickedUp => "OnItemPickedUp",
            HostEvent::NpcInteract => "OnNpcInteract",
            HostEvent::ShopOpened => "OnShopOpened",
            HostEvent::QuestUpdated => "OnQuestUpdated",
        }
    }

    pub fn from_handler_name(name: &str) -> Option<Self> {
        HostEvent::ALL
            .into_iter()
            .find(|event| event.handler_name() == name)
    }
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.handler_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_names_round_trip() {
        for event in HostEvent::ALL {
            assert_eq!(HostEvent::from_handler_name(event.handler_name()), Some(event));
        }
        assert_eq!(HostEvent::from_handler_name("OnSomethingElse"), None);
        assert_eq!(HostEvent::from_handler_name(UPDATE_HOOK), None);
    }
}
