use chanpost_telegram::BotCommand;

/// Command menu registered with Telegram at startup.
pub fn menu() -> Vec<BotCommand> {
    [
        ("info", "info about the database"),
        ("preview", "[all] get the post preview in this chat"),
        ("post", "post the post immediately"),
        ("random", "make a random post immediately"),
        ("remove", "delete the post from the database"),
        ("schedule", "[HH:MM...] change schedule"),
        ("notext", "clear text of the post"),
        ("nocomment", "remove the comment of the post"),
        ("nocommenttext", "clear text of a post's comment"),
        ("source", "post sources in the comments of the post"),
        ("docs", "convert docs to images in comments (or vice-versa)"),
        ("protected", "make post protected/unprotected"),
        ("reconcile", "repair database indices"),
        ("clear", "[all] remove all post from DB"),
        ("shutdown", "manually shutdown the bot, usage: /shutdown please"),
    ]
    .into_iter()
    .map(|(command, description)| BotCommand::new(command, description))
    .collect()
}
