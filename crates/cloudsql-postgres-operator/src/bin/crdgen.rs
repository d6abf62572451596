use cloudsql_postgres_operator::crds::postgresql_instance::PostgresqlInstance;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&PostgresqlInstance::crd())?);
    Ok(())
}
