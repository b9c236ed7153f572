use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::context::{Check, VuContext};
use crate::error::Result;
use crate::response::Response;

/// Behaviour a VU repeats until the runner tells it to stop.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Custom rate metrics the scenario records; registered before the run
    /// so thresholds can reference them.
    fn rates(&self) -> Vec<&'static str> {
        Vec::new()
    }

    async fn iteration(&self, ctx: &VuContext) -> Result<()>;
}

pub const ERRORS: &str = "errors";
pub const HELLO_STATUS_200: &str = "hello status 200";
pub const USERS_STATUS_200: &str = "users list status 200";
pub const USERS_HAS_DATA: &str = "users list has data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pauses {
    /// Pause after each request.
    pub think_time: Duration,
    /// Extra pause before the next iteration starts.
    pub cooldown: Duration,
}

impl Default for Pauses {
    fn default() -> Self {
        Self {
            think_time: Duration::from_millis(500),
            cooldown: Duration::from_secs(1),
        }
    }
}

/// `GET /hello`, then `GET /users`. Each failed check group adds one hit to
/// the `errors` rate, which is divided by the number of iterations.
#[derive(Debug, Clone, Default)]
pub struct UsersScenario {
    pauses: Pauses,
}

impl UsersScenario {
    pub fn new(pauses: Pauses) -> Self {
        Self { pauses }
    }
}

fn has_users(response: &Response) -> bool {
    match response.json::<Vec<Value>>() {
        Ok(users) => !users.is_empty(),
        Err(e) => {
            debug!(status = response.status(), error = %e, "users body is not a JSON array");
            false
        }
    }
}

#[async_trait]
impl Scenario for UsersScenario {
    fn name(&self) -> &str {
        "users"
    }

    fn rates(&self) -> Vec<&'static str> {
        vec![ERRORS]
    }

    async fn iteration(&self, ctx: &VuContext) -> Result<()> {
        let hello = ctx.get("/hello").await;
        if !ctx.check(&hello, [Check::new(HELLO_STATUS_200, |r| r.status() == 200)]) {
            ctx.increment(ERRORS);
        }

        ctx.sleep(self.pauses.think_time).await;

        let users = ctx.get("/users").await;
        let ok = ctx.check(
            &users,
            [
                Check::new(USERS_STATUS_200, |r| r.status() == 200),
                Check::new(USERS_HAS_DATA, has_users),
            ],
        );
        if !ok {
            ctx.increment(ERRORS);
        }

        ctx.sleep(self.pauses.think_time).await;
        ctx.sleep(self.pauses.cooldown).await;

        Ok(())
    }
}
