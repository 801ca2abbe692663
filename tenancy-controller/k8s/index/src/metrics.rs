use crate::{catalog, collision, custom_quota, tenants};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented {
    tenants: tenants::SharedIndex,
    catalog: catalog::SharedCatalog,
    collisions: collision::SharedIndex,
    quotas: custom_quota::SharedIndex,
}

pub fn register(
    reg: &mut Registry,
    tenants: tenants::SharedIndex,
    catalog: catalog::SharedCatalog,
    collisions: collision::SharedIndex,
    quotas: custom_quota::SharedIndex,
) {
    reg.register_collector(Box::new(Instrumented {
        tenants,
        catalog,
        collisions,
        quotas,
    }));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let (tenant_count, binding_count) = {
            let tenants = self.tenants.read();
            (tenants.tenant_count(), tenants.binding_count())
        };

        let tenant_encoder = encoder.encode_descriptor(
            "tenant_index_size",
            "The number of tenants in the ownership index",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(tenant_count as u32).encode(tenant_encoder)?;

        let binding_encoder = encoder.encode_descriptor(
            "namespace_binding_index_size",
            "The number of namespaces bound to a tenant",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(binding_count as u32).encode(binding_encoder)?;

        let catalog_encoder = encoder.encode_descriptor(
            "class_catalog_index_size",
            "The number of class objects in the catalog",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(self.catalog.read().len() as u32).encode(catalog_encoder)?;

        let collision_encoder = encoder.encode_descriptor(
            "hostname_collision_index_size",
            "The number of hostname/path keys in the collision index",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(self.collisions.read().key_count() as u32).encode(collision_encoder)?;

        let quota_encoder = encoder.encode_descriptor(
            "custom_quota_index_size",
            "The number of ClusterCustomQuotas in the index",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(self.quotas.read().len() as u32).encode(quota_encoder)?;

        Ok(())
    }
}
