use crate::commands::{repair, replay, worker};

#[derive(Clone, Copy)]
pub struct ExampleGroup {
    pub title: &'static str,
    pub commands: &'static [&'static str],
}

#[derive(Clone, Copy)]
pub struct CommandExample {
    pub name: &'static str,
    pub groups: &'static [ExampleGroup],
}

pub fn command_examples() -> &'static [CommandExample] {
    &[
        CommandExample {
            name: "worker",
            groups: worker::EXAMPLES,
        },
        CommandExample {
            name: "replay",
            groups: replay::EXAMPLES,
        },
        CommandExample {
            name: "cascade",
            groups: repair::CASCADE_EXAMPLES,
        },
        CommandExample {
            name: "propagate-image",
            groups: repair::PROPAGATE_EXAMPLES,
        },
    ]
}
