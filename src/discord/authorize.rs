use serenity::model::id::{GuildId, RoleId};
use serenity::model::user::User;
use serenity::prelude::Context;

/// Role that grants bridge access by name, compared case-insensitively.
pub const CONTROL_ROLE: &str = "remote-vibe";

/// Gate every message and voice-state event: server owner, administrator,
/// manage-server, or the named control role. Bots never pass.
pub fn is_authorized(
    ctx: &Context,
    guild_id: Option<GuildId>,
    author: &User,
    member_roles: &[RoleId],
) -> bool {
    if author.bot {
        return false;
    }
    let Some(guild_id) = guild_id else {
        return false;
    };
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return false;
    };

    if guild.owner_id == author.id {
        return true;
    }

    member_roles.iter().any(|role_id| {
        guild
            .roles
            .get(role_id)
            .map(|role| {
                role.permissions.administrator()
                    || role.permissions.manage_guild()
                    || role.name.eq_ignore_ascii_case(CONTROL_ROLE)
            })
            .unwrap_or(false)
    })
}
