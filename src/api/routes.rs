use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteId {
    Root,
    Health,
    Enhance,
    EnhanceProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDefinition {
    pub method: HttpMethod,
    pub path: &'static str,
    pub id: RouteId,
}

impl fmt::Display for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.path)
    }
}

pub fn route_catalog() -> Vec<RouteDefinition> {
    ROUTES.to_vec()
}

// `/enhance/` is the historical path; the slashless form is kept for clients
// that normalise URLs.
const ROUTES: &[RouteDefinition] = &[
    RouteDefinition {
        method: HttpMethod::Get,
        path: "/",
        id: RouteId::Root,
    },
    RouteDefinition {
        method: HttpMethod::Get,
        path: "/health",
        id: RouteId::Health,
    },
    RouteDefinition {
        method: HttpMethod::Post,
        path: "/enhance/",
        id: RouteId::Enhance,
    },
    RouteDefinition {
        method: HttpMethod::Post,
        path: "/enhance",
        id: RouteId::Enhance,
    },
    RouteDefinition {
        method: HttpMethod::Post,
        path: "/enhance/{profile}",
        id: RouteId::EnhanceProfile,
    },
];
