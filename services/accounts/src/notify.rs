//! Notification collaborator boundary. Delivery is best-effort: callers log
//! failures and move on; nothing in a lifecycle transition waits on, or is
//! rolled back by, mail.

use async_trait::async_trait;
use models::{Role, User};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &User, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Default backend: writes the message to the log. The real mailer lives in
/// a separate delivery service.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &User, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(
            recipient = %recipient.email,
            subject,
            body_len = body.len(),
            "outbound notification"
        );
        Ok(())
    }
}

pub fn onboarding_subject(org_title: &str) -> String {
    org_title.to_owned()
}

pub fn onboarding_body(domain: &str, user: &User, password: &str) -> String {
    let greeting = match user.role {
        Role::Student => "Вы зарегистрированы как ученик",
        Role::Teacher | Role::Admin => "Вы зарегистрированы как преподаватель",
    };
    format!(
        "{greeting} на площадке {domain}.\nЛогин: {}\nПароль: {password}\n",
        user.email
    )
}

pub fn admin_new_user_subject(user: &User) -> &'static str {
    match user.role {
        Role::Student => "Новый ученик",
        Role::Teacher | Role::Admin => "Новый преподаватель",
    }
}

pub fn admin_new_user_body(user: &User) -> String {
    format!("Зарегистрирован новый пользователь: {} ({})", user.full_name(), user.email)
}

pub const PASSWORD_RESET_SUBJECT: &str = "Сброс пароля";

pub fn password_reset_body(password: &str) -> String {
    format!(
        "Вы получили это письмо, потому что был отправлен запрос на смену пароля.\n\
         Если Вы не отправляли подобный запрос, не обращайте внимания на это письмо.\n\
         Ваш новый пароль: {password}\n"
    )
}

pub const BATCH_RESET_SUBJECT: &str = "Новые данные для входа";

pub fn batch_reset_body(password: &str) -> String {
    format!(
        "Ваш пароль был сброшен, новый пароль: {password}\n\
         Пароль можно сменить в настройках профиля.\n"
    )
}
