//! Default ordered registry of remote record types.
//!
//! Registration order is the dependency-safe order for reads and upserts;
//! pruning and teardown walk it in reverse so child records go first. The
//! graph is deliberately circular through `primary_ip4`/`primary_ip6`: a
//! device points at its primary address, the address points at an interface,
//! the interface points back at the device. The synchronizer's final pass
//! breaks that cycle.

use super::schema::{RecordSchema, TypeRegistry, ValueKind};

/// Build the default type registry.
pub fn default_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();

    registry.register(
        RecordSchema::new("tag", "extras/tags")
            .field("name", ValueKind::Scalar)
            .field("color", ValueKind::Scalar)
            .field("description", ValueKind::Scalar),
    );

    registry.register(
        RecordSchema::new("tenant", "tenancy/tenants")
            .taggable()
            .field("name", ValueKind::Scalar)
            .field("slug", ValueKind::Scalar),
    );

    registry.register(
        RecordSchema::new("site", "dcim/sites")
            .taggable()
            .depends_on("tenant")
            .field("name", ValueKind::Scalar)
            .field("slug", ValueKind::Scalar)
            .field("status", ValueKind::Scalar)
            .field("tenant", ValueKind::reference("tenant")),
    );

    registry.register(
        RecordSchema::new("manufacturer", "dcim/manufacturers")
            .field("name", ValueKind::Scalar)
            .field("slug", ValueKind::Scalar),
    );

    registry.register(
        RecordSchema::new("device-type", "dcim/device-types")
            .primary_key("model")
            .depends_on("manufacturer")
            .field("model", ValueKind::Scalar)
            .field("slug", ValueKind::Scalar)
            .field("manufacturer", ValueKind::reference("manufacturer")),
    );

    registry.register(
        RecordSchema::new("platform", "dcim/platforms")
            .depends_on("manufacturer")
            .field("name", ValueKind::Scalar)
            .field("slug", ValueKind::Scalar)
            .field("manufacturer", ValueKind::reference("manufacturer")),
    );

    registry.register(
        RecordSchema::new("cluster", "virtualization/clusters")
            .taggable()
            .depends_on("site")
            .field("name", ValueKind::Scalar)
            .field("site", ValueKind::reference("site")),
    );

    registry.register(
        RecordSchema::new("device", "dcim/devices")
            .taggable()
            .prunable()
            .depends_on("device-type")
            .depends_on("platform")
            .depends_on("site")
            .depends_on("tenant")
            .depends_on("ip-address")
            .child_link("interface", "device")
            .field("name", ValueKind::Scalar)
            .field("status", ValueKind::Scalar)
            .field("serial", ValueKind::Scalar)
            .field("device_type", ValueKind::reference("device-type"))
            .field("platform", ValueKind::reference("platform"))
            .field("site", ValueKind::reference("site"))
            .field("tenant", ValueKind::reference("tenant"))
            .field("primary_ip4", ValueKind::reference("ip-address"))
            .field("primary_ip6", ValueKind::reference("ip-address")),
    );

    registry.register(
        RecordSchema::new("virtual-machine", "virtualization/virtual-machines")
            .taggable()
            .prunable()
            .secondary_key("cluster")
            .depends_on("cluster")
            .depends_on("platform")
            .depends_on("tenant")
            .depends_on("ip-address")
            .child_link("vm-interface", "virtual_machine")
            .field("name", ValueKind::Scalar)
            .field("status", ValueKind::Scalar)
            .field("vcpus", ValueKind::Scalar)
            .field("memory", ValueKind::Scalar)
            .field("disk", ValueKind::Scalar)
            .field("cluster", ValueKind::reference("cluster"))
            .field("platform", ValueKind::reference("platform"))
            .field("tenant", ValueKind::reference("tenant"))
            .field("primary_ip4", ValueKind::reference("ip-address"))
            .field("primary_ip6", ValueKind::reference("ip-address")),
    );

    // interfaces carry no last_updated timestamp on the wire; pruning deletes
    // them through their parent's child link
    registry.register(
        RecordSchema::new("interface", "dcim/interfaces")
            .taggable()
            .prunable()
            .secondary_key("device")
            .depends_on("device")
            .field("name", ValueKind::Scalar)
            .field("type", ValueKind::Scalar)
            .field("enabled", ValueKind::Scalar)
            .field("mtu", ValueKind::Scalar)
            .field("mac_address", ValueKind::Scalar)
            .field("device", ValueKind::reference("device")),
    );

    registry.register(
        RecordSchema::new("vm-interface", "virtualization/interfaces")
            .taggable()
            .prunable()
            .secondary_key("virtual_machine")
            .depends_on("virtual-machine")
            .field("name", ValueKind::Scalar)
            .field("enabled", ValueKind::Scalar)
            .field("mtu", ValueKind::Scalar)
            .field("mac_address", ValueKind::Scalar)
            .field("virtual_machine", ValueKind::reference("virtual-machine")),
    );

    registry.register(
        RecordSchema::new("ip-address", "ipam/ip-addresses")
            .taggable()
            .prunable()
            .primary_key("address")
            .depends_on("tenant")
            .depends_on("interface")
            .depends_on("vm-interface")
            .field("address", ValueKind::Scalar)
            .field("status", ValueKind::Scalar)
            .field("tenant", ValueKind::reference("tenant"))
            .field("interface", ValueKind::reference("interface"))
            .field("vm_interface", ValueKind::reference("vm-interface")),
    );

    registry
}
