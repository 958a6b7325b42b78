use crate::{
    api::OutboundReply,
    events::{AppMentionEvent, SlashCommand},
};

/// Slash commands the bot answers. Matching is exact: no trimming, no case
/// folding, no argument parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KnownCommand {
    Hello,
}

impl KnownCommand {
    pub const ALL: [KnownCommand; 1] = [KnownCommand::Hello];

    pub fn parse(command: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|known| known.name() == command)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Hello => "/hello",
        }
    }
}

/// Greeting text; `<@U…>` renders as an @-mention of the user in Slack.
pub fn greeting(user_id: &str) -> String {
    format!("Hello <@{user_id}>!")
}

pub fn mention_reply(mention: &AppMentionEvent) -> OutboundReply {
    OutboundReply::new(mention.channel.clone(), greeting(&mention.user))
}

pub fn command_reply(command: &SlashCommand) -> Option<OutboundReply> {
    match KnownCommand::parse(&command.command)? {
        KnownCommand::Hello => {
            Some(OutboundReply::new(command.channel_id.clone(), greeting(&command.user_id)))
        }
    }
}
