//! Attachability checks for services.
//!
//! A service is attachable when:
//! 1. exactly one subscription configuration is associated with it
//! 2. it declares no request/response resources
//! 3. it declares one or two entry points, `on_message` and optionally `on_error`
//! 4. `on_message` takes one or two parameters, `Message` (required) and `Caller`
//! 5. `on_error`, if present, takes exactly one `Error` parameter
//!
//! Checks run before any broker resource is created. The result is a
//! [`HandlerShape`] the dispatcher consults on every call.

use std::fmt;

use super::service::{ParamType, Service, ON_ERROR, ON_MESSAGE};

/// A violated attachability rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    MissingConfig,
    MultipleConfigs(usize),
    ResourceMethods(Vec<String>),
    EntryPointCount(usize),
    UnknownEntryPoint(String),
    DuplicateEntryPoint(String),
    MissingOnMessage,
    OnMessageArity(usize),
    OnMessageParamType(String),
    MissingMessageParam,
    DuplicateParam(String),
    OnErrorArity(usize),
    OnErrorParamType(String),
}

impl ValidationError {
    /// Number of the violated rule (1 to 5).
    pub fn rule(&self) -> u8 {
        match self {
            ValidationError::MissingConfig | ValidationError::MultipleConfigs(_) => 1,
            ValidationError::ResourceMethods(_) => 2,
            ValidationError::EntryPointCount(_)
            | ValidationError::UnknownEntryPoint(_)
            | ValidationError::DuplicateEntryPoint(_)
            | ValidationError::MissingOnMessage => 3,
            ValidationError::OnMessageArity(_)
            | ValidationError::OnMessageParamType(_)
            | ValidationError::MissingMessageParam
            | ValidationError::DuplicateParam(_) => 4,
            ValidationError::OnErrorArity(_) | ValidationError::OnErrorParamType(_) => 5,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {}: ", self.rule())?;
        match self {
            ValidationError::MissingConfig => {
                write!(f, "a subscription configuration is required")
            }
            ValidationError::MultipleConfigs(n) => write!(
                f,
                "exactly one subscription configuration is allowed, found {}",
                n
            ),
            ValidationError::ResourceMethods(paths) => {
                write!(f, "service cannot have resource methods: {}", paths.join(", "))
            }
            ValidationError::EntryPointCount(n) => write!(
                f,
                "service must have exactly one or two remote methods, found {}",
                n
            ),
            ValidationError::UnknownEntryPoint(name) => write!(
                f,
                "invalid remote method name '{}', expected {} or {}",
                name, ON_MESSAGE, ON_ERROR
            ),
            ValidationError::DuplicateEntryPoint(name) => {
                write!(f, "remote method '{}' is declared more than once", name)
            }
            ValidationError::MissingOnMessage => {
                write!(f, "service must declare an {} method", ON_MESSAGE)
            }
            ValidationError::OnMessageArity(n) => write!(
                f,
                "{} method can only have either one or two parameters, found {}",
                ON_MESSAGE, n
            ),
            ValidationError::OnMessageParamType(ty) => write!(
                f,
                "{} parameters must be of type Message or Caller, found {}",
                ON_MESSAGE, ty
            ),
            ValidationError::MissingMessageParam => {
                write!(f, "required parameter Message cannot be found")
            }
            ValidationError::DuplicateParam(ty) => {
                write!(f, "{} declares parameter {} more than once", ON_MESSAGE, ty)
            }
            ValidationError::OnErrorArity(n) => write!(
                f,
                "{} method must have exactly one parameter, found {}",
                ON_ERROR, n
            ),
            ValidationError::OnErrorParamType(ty) => write!(
                f,
                "{} parameter must be of type Error, found {}",
                ON_ERROR, ty
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A parameter the dispatcher fills for `on_message`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    Message,
    Caller,
}

/// What a validated service's entry points accept, built once at attach time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerShape {
    /// `on_message` parameters in declared order.
    pub params: Vec<Param>,
    pub has_error_handler: bool,
}

impl HandlerShape {
    pub fn accepts_caller(&self) -> bool {
        self.params.contains(&Param::Caller)
    }
}

/// Check `service` against the attachability rules.
pub fn validate(service: &Service) -> Result<HandlerShape, ValidationError> {
    match service.configs().len() {
        0 => return Err(ValidationError::MissingConfig),
        1 => {}
        n => return Err(ValidationError::MultipleConfigs(n)),
    }

    if !service.resources().is_empty() {
        return Err(ValidationError::ResourceMethods(service.resources().to_vec()));
    }

    let methods = service.remote_methods();
    if methods.is_empty() || methods.len() > 2 {
        return Err(ValidationError::EntryPointCount(methods.len()));
    }
    for (i, method) in methods.iter().enumerate() {
        if method.name() != ON_MESSAGE && method.name() != ON_ERROR {
            return Err(ValidationError::UnknownEntryPoint(method.name().to_string()));
        }
        if methods[..i].iter().any(|m| m.name() == method.name()) {
            return Err(ValidationError::DuplicateEntryPoint(method.name().to_string()));
        }
    }

    let on_message = service
        .method(ON_MESSAGE)
        .ok_or(ValidationError::MissingOnMessage)?;
    let declared = on_message.params();
    if declared.is_empty() || declared.len() > 2 {
        return Err(ValidationError::OnMessageArity(declared.len()));
    }
    let mut params = Vec::with_capacity(declared.len());
    for ty in declared {
        let param = match ty {
            ParamType::Message => Param::Message,
            ParamType::Caller => Param::Caller,
            other => return Err(ValidationError::OnMessageParamType(other.to_string())),
        };
        if params.contains(&param) {
            return Err(ValidationError::DuplicateParam(ty.to_string()));
        }
        params.push(param);
    }
    if !params.contains(&Param::Message) {
        return Err(ValidationError::MissingMessageParam);
    }

    let has_error_handler = match service.method(ON_ERROR) {
        Some(on_error) => {
            let declared = on_error.params();
            if declared.len() != 1 {
                return Err(ValidationError::OnErrorArity(declared.len()));
            }
            if declared[0] != ParamType::Error {
                return Err(ValidationError::OnErrorParamType(declared[0].to_string()));
            }
            true
        }
        None => false,
    };

    Ok(HandlerShape {
        params,
        has_error_handler,
    })
}
