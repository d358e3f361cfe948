use http::Method;
use std::collections::HashMap;

#[derive(Debug, PartialEq)]
enum PathSegment {
    Static(String),
    Param(String),
}

/// A path pattern made of static segments, `{name}` parameters and an
/// optional trailing `{*name}` capture.
///
/// Unlike a prefix match, trailing slashes are significant: `/{project}`
/// matches `/flask` but not `/flask/`, while `/{project}/{*path}` matches
/// `/flask/` with an empty `path`.
#[derive(Debug)]
struct Path {
    segments: Vec<PathSegment>,
    tail: Option<String>,
}

impl Path {
    fn parse(path_str: &str) -> Self {
        let mut segments = Vec::new();
        let mut tail = None;

        let trimmed = path_str.trim().trim_start_matches('/');
        if !trimmed.is_empty() {
            for s in trimmed.split('/') {
                if let Some(name) = s.strip_prefix("{*").and_then(|s| s.strip_suffix('}')) {
                    tail = Some(name.to_string());
                    break;
                } else if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    segments.push(PathSegment::Param(name.to_string()));
                } else {
                    segments.push(PathSegment::Static(s.to_string()));
                }
            }
        }

        Path { segments, tail }
    }

    /// Matches a request path against this pattern.
    /// Returns Some(params) if the match succeeds, None otherwise.
    fn matches<'a>(&self, request_path: &'a str) -> Option<HashMap<String, &'a str>> {
        let mut rest = request_path.strip_prefix('/')?;
        let mut params = HashMap::new();

        if self.segments.is_empty() && self.tail.is_none() {
            return rest.is_empty().then_some(params);
        }

        for (i, seg) in self.segments.iter().enumerate() {
            let last = i + 1 == self.segments.len() && self.tail.is_none();
            let (value, remainder) = match rest.split_once('/') {
                Some((value, remainder)) if !last => (value, remainder),
                Some(_) => return None,
                None if last => (rest, ""),
                None => return None,
            };

            match seg {
                PathSegment::Static(s) if s == value => {}
                PathSegment::Static(_) => return None,
                PathSegment::Param(_) if value.is_empty() => return None,
                PathSegment::Param(name) => {
                    params.insert(name.clone(), value);
                }
            }
            rest = remainder;
        }

        if let Some(name) = &self.tail {
            params.insert(name.clone(), rest);
        }

        Some(params)
    }
}

#[derive(Debug, PartialEq)]
pub struct RouteMatch<'a, A> {
    pub params: HashMap<String, &'a str>,
    pub action: &'a A,
}

impl<A> RouteMatch<'_, A> {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).copied()
    }
}

#[derive(Debug, PartialEq)]
pub enum Resolution<'a, A> {
    Matched(RouteMatch<'a, A>),
    MethodNotAllowed,
    NotFound,
}

#[derive(Debug)]
pub struct Route<A> {
    methods: Vec<Method>,
    path: Path,
    action: A,
}

impl<A> Route<A> {
    pub fn new(methods: &[Method], path: &str, action: A) -> Self {
        Self {
            methods: methods.to_vec(),
            path: Path::parse(path),
            action,
        }
    }
}

pub struct Router<A> {
    routes: Vec<Route<A>>,
}

impl<A> Router<A> {
    pub fn new(routes: Vec<Route<A>>) -> Self {
        Self { routes }
    }

    /// Returns the first route whose path and method both match. A path that
    /// only matches under other methods yields `MethodNotAllowed`.
    pub fn resolve<'a>(&'a self, method: &Method, path: &'a str) -> Resolution<'a, A> {
        let mut path_matched = false;

        for route in &self.routes {
            let Some(params) = route.path.matches(path) else {
                continue;
            };
            if route.methods.contains(method) {
                return Resolution::Matched(RouteMatch {
                    params,
                    action: &route.action,
                });
            }
            path_matched = true;
        }

        if path_matched {
            Resolution::MethodNotAllowed
        } else {
            Resolution::NotFound
        }
    }
}
