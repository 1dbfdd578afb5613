//! Built-in scope catalog

use std::sync::Arc;

use oap_common::Result;

use super::{DefaultFieldsDecorator, FieldType, SchemaRegistry, ScopeDefinition, SourceField};

pub const SERVICE: u32 = 1;
pub const SERVICE_INSTANCE: u32 = 2;
pub const ENDPOINT: u32 = 3;
pub const SERVICE_RELATION: u32 = 4;
pub const SERVICE_INSTANCE_JVM_CPU: u32 = 8;
pub const SERVICE_INSTANCE_JVM_MEMORY: u32 = 9;
pub const SERVICE_INSTANCE_JVM_GC: u32 = 11;

fn request_type() -> FieldType {
    FieldType::enumeration("RequestType", &["RPC", "DATABASE", "HTTP", "GRPC", "MQ", "CACHE"])
}

fn detect_point() -> FieldType {
    FieldType::enumeration("DetectPoint", &["CLIENT", "SERVER", "PROXY"])
}

fn side_car() -> FieldType {
    FieldType::Struct(vec![
        Arc::new(SourceField::new("internalErrorCode", FieldType::String)),
        Arc::new(SourceField::new("internalRequestLatencyNanos", FieldType::Long)),
        Arc::new(SourceField::new("internalResponseLatencyNanos", FieldType::Long)),
    ])
}

/// Request fields shared by the traffic scopes
fn with_request_fields(scope: ScopeDefinition) -> ScopeDefinition {
    scope
        .field(SourceField::new("latency", FieldType::Int))
        .field(SourceField::new("status", FieldType::Bool))
        .field(SourceField::new("httpResponseStatusCode", FieldType::Int))
        .field(SourceField::new("rpcStatusCode", FieldType::String))
        .field(SourceField::new("type", request_type()))
        .field(SourceField::new("tags", FieldType::StringList))
        .field(SourceField::new("tag", FieldType::Map))
}

fn instance_entity(id: u32, name: &str) -> ScopeDefinition {
    ScopeDefinition::new(id, name)
        .catalog("SERVICE_INSTANCE")
        .field(SourceField::new("entityId", FieldType::String).id().sharding_key(0))
        .field(SourceField::new("serviceId", FieldType::String).entity())
        .field(SourceField::new("name", FieldType::String))
        .field(SourceField::new("serviceName", FieldType::String))
}

/// Register every built-in scope and decorator into `registry`
pub fn register_builtin_scopes(registry: &mut SchemaRegistry) -> Result<()> {
    registry.register_scope(with_request_fields(
        ScopeDefinition::new(SERVICE, "Service")
            .catalog("SERVICE")
            .field(SourceField::new("entityId", FieldType::String).id().sharding_key(0))
            .field(SourceField::new("name", FieldType::String))
            .field(SourceField::new("serviceInstanceName", FieldType::String))
            .field(SourceField::new("endpointName", FieldType::String))
            .field(SourceField::new("sideCar", side_car())),
    ))?;

    registry.register_scope(with_request_fields(
        ScopeDefinition::new(SERVICE_INSTANCE, "ServiceInstance")
            .catalog("SERVICE_INSTANCE")
            .field(SourceField::new("entityId", FieldType::String).id().sharding_key(0))
            .field(SourceField::new("serviceId", FieldType::String).entity())
            .field(SourceField::new("name", FieldType::String))
            .field(SourceField::new("serviceName", FieldType::String))
            .field(SourceField::new("endpointName", FieldType::String))
            .field(SourceField::new("sideCar", side_car())),
    ))?;

    registry.register_scope(with_request_fields(
        ScopeDefinition::new(ENDPOINT, "Endpoint")
            .catalog("ENDPOINT")
            .field(SourceField::new("entityId", FieldType::String).id().sharding_key(0))
            .field(SourceField::new("serviceId", FieldType::String).entity())
            .field(SourceField::new("name", FieldType::String))
            .field(SourceField::new("serviceName", FieldType::String))
            .field(SourceField::new("serviceInstanceName", FieldType::String))
            .field(SourceField::new("sideCar", side_car())),
    ))?;

    registry.register_scope(with_request_fields(
        ScopeDefinition::new(SERVICE_RELATION, "ServiceRelation")
            .catalog("SERVICE_RELATION")
            .field(SourceField::new("entityId", FieldType::String).id().sharding_key(0))
            .field(SourceField::new("sourceServiceId", FieldType::String).entity())
            .field(SourceField::new("destServiceId", FieldType::String).entity())
            .field(SourceField::new("sourceServiceName", FieldType::String))
            .field(SourceField::new("destServiceName", FieldType::String))
            .field(SourceField::new("componentId", FieldType::Int).entity())
            .field(SourceField::new("detectPoint", detect_point()))
            .field(SourceField::new("tlsMode", FieldType::String)),
    ))?;

    registry.register_scope(
        instance_entity(SERVICE_INSTANCE_JVM_CPU, "ServiceInstanceJVMCPU")
            .field(SourceField::new("usePercent", FieldType::Double)),
    )?;

    registry.register_scope(
        instance_entity(SERVICE_INSTANCE_JVM_MEMORY, "ServiceInstanceJVMMemory")
            .field(SourceField::new("heapStatus", FieldType::Bool))
            .field(SourceField::new("init", FieldType::Long))
            .field(SourceField::new("max", FieldType::Long))
            .field(SourceField::new("used", FieldType::Long))
            .field(SourceField::new("committed", FieldType::Long)),
    )?;

    registry.register_scope(
        instance_entity(SERVICE_INSTANCE_JVM_GC, "ServiceInstanceJVMGC")
            .field(SourceField::new(
                "phase",
                FieldType::enumeration("GCPhase", &["NEW", "OLD", "NORMAL"]),
            ))
            .field(SourceField::new("time", FieldType::Long))
            .field(SourceField::new("count", FieldType::Long)),
    )?;

    registry.register_decorator(Arc::new(
        DefaultFieldsDecorator::new("ServiceDecorator").default_value("rpcStatusCode", "OK"),
    ))?;

    Ok(())
}

/// A registry holding only the built-in catalog
pub fn default_registry() -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    register_builtin_scopes(&mut registry)?;
    Ok(registry)
}
