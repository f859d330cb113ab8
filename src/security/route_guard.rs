use crate::security::roles::{Role, RoleSet};
use crate::session::credential_store::{Claims, Credential};

/// Outcome of a navigation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Not signed in. `from` is where to send the user back after login.
    RedirectToLogin { from: String },
    /// Signed in, but none of the user's roles are on the allow-list.
    RedirectToUnauthorized { from: String },
    NotFound,
}

impl Decision {
    /// Path the caller should navigate to instead, if any.
    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            Decision::Allow => None,
            Decision::RedirectToLogin { .. } => Some("/login"),
            Decision::RedirectToUnauthorized { .. } => Some("/unauthorized"),
            Decision::NotFound => Some("/404"),
        }
    }
}

/// Role check for a single protected location.
pub fn authorize(claims: Option<&Claims>, allowed: &RoleSet, location: &str) -> Decision {
    match claims {
        None => Decision::RedirectToLogin {
            from: location.to_string(),
        },
        Some(claims) if allowed.intersects(&claims.role_codes) => Decision::Allow,
        Some(_) => Decision::RedirectToUnauthorized {
            from: location.to_string(),
        },
    }
}

#[derive(Debug, Clone)]
enum Access {
    Public,
    Protected(RoleSet),
}

#[derive(Debug, Clone)]
struct Route {
    path: String,
    access: Access,
}

/// The application's route map.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public(mut self, path: &str) -> Self {
        self.routes.push(Route {
            path: path.to_string(),
            access: Access::Public,
        });
        self
    }

    pub fn protected(mut self, path: &str, roles: &[Role]) -> Self {
        self.routes.push(Route {
            path: path.to_string(),
            access: Access::Protected(RoleSet::of(roles)),
        });
        self
    }

    /// Routes served by the checklist application.
    pub fn application() -> Self {
        Self::new()
            .public("/")
            .public("/login")
            .public("/unauthorized")
            .protected("/dashboard", &Role::ALL)
            .protected("/data", &Role::ALL)
            .protected("/editor", &[Role::Editor, Role::Admin])
            .protected("/admin", &[Role::Admin])
    }

    pub fn allow_list(&self, path: &str) -> Option<&RoleSet> {
        match self.find(path)?.access {
            Access::Protected(ref roles) => Some(roles),
            Access::Public => None,
        }
    }

    /// Authorize navigation to `path` with the given credential. Protected
    /// routes also require a bearer token, not just claims.
    pub fn authorize(&self, path: &str, credential: &Credential) -> Decision {
        let Some(route) = self.find(path) else {
            return Decision::NotFound;
        };
        match &route.access {
            Access::Public => Decision::Allow,
            Access::Protected(allowed) => {
                let decision = authorize(credential.claims.as_ref(), allowed, path);
                if decision == Decision::Allow && credential.bearer_token.is_none() {
                    // claims without a token: signed in once, but the session is gone
                    return Decision::RedirectToLogin {
                        from: path.to_string(),
                    };
                }
                decision
            }
        }
    }

    fn find(&self, path: &str) -> Option<&Route> {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };
        self.routes.iter().find(|r| r.path == trimmed)
    }
}
