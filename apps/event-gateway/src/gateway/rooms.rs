//! Role-scoped room naming.

/// Default template: a `STUDENT` user joins `role_STUDENT_room`.
pub const DEFAULT_ROLE_ROOM_TEMPLATE: &str = "role_{role}_room";

const ROLE_PLACEHOLDER: &str = "{role}";

/// Maps a role to the room every connection of that role auto-joins.
#[derive(Debug, Clone)]
pub struct RoomNaming {
    template: String,
}

impl RoomNaming {
    /// A template without a `{role}` placeholder gets the role appended, so
    /// distinct roles never collapse into one room.
    pub fn new(template: impl Into<String>) -> Self {
        let mut template = template.into();
        if !template.contains(ROLE_PLACEHOLDER) {
            template.push_str(ROLE_PLACEHOLDER);
        }
        Self { template }
    }

    pub fn room_for_role(&self, role: &str) -> String {
        self.template.replace(ROLE_PLACEHOLDER, role)
    }
}

impl Default for RoomNaming {
    fn default() -> Self {
        Self::new(DEFAULT_ROLE_ROOM_TEMPLATE)
    }
}
