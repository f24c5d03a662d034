use proc_macro::TokenStream;

use quote::quote;
use syn::{
    Attribute, Expr, ExprArray, ExprLit, ExprPath, Ident, ItemStruct, Lit, Meta, Token,
    parse::Parser, spanned::Spanned,
};

/// Declares a patch module and what it needs from the host.
///
/// ```ignore
/// #[Module(id = "debug", boot_images = [], ext_images = [System, Vendor], selinux_patching = true)]
/// pub struct DebugModule;
///
/// impl DebugModule {
///     fn run(&self, res: &mut PreparedResources<'_>, ctx: &mut ExecCtx) -> Result<()> { .. }
/// }
/// ```
///
/// Partition names are variants of `crate::requirements::Partition`.
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Module(attr: TokenStream, item: TokenStream) -> TokenStream {
    match module_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

fn lit_str(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        _ => Err(syn::Error::new(expr.span(), "expected string literal")),
    }
}

fn lit_bool(expr: &Expr) -> syn::Result<bool> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Bool(b), ..
        }) => Ok(b.value),
        _ => Err(syn::Error::new(expr.span(), "expected bool literal")),
    }
}

fn expr_array_idents(expr: &Expr) -> syn::Result<Vec<Ident>> {
    let Expr::Array(ExprArray { elems, .. }) = expr else {
        return Err(syn::Error::new(expr.span(), "expected array literal"));
    };
    let mut out: Vec<Ident> = Vec::new();
    for e in elems {
        let Expr::Path(ExprPath { path, .. }) = e else {
            return Err(syn::Error::new(e.span(), "expected partition name"));
        };
        let Some(ident) = path.get_ident() else {
            return Err(syn::Error::new(
                path.span(),
                "expected a bare partition name (e.g. System)",
            ));
        };
        if out.iter().any(|seen| seen == ident) {
            return Err(syn::Error::new(
                ident.span(),
                format!("partition '{ident}' is listed twice"),
            ));
        }
        out.push(ident.clone());
    }
    Ok(out)
}

fn drop_our_attrs(attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|a| {
            let Meta::Path(p) = &a.meta else {
                return true;
            };
            !p.is_ident("Module")
        })
        .cloned()
        .collect()
}

struct ModuleMeta {
    id: String,
    boot_images: Vec<Ident>,
    ext_images: Vec<Ident>,
    selinux_patching: bool,
}

fn module_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = drop_our_attrs(&st.attrs);
    let struct_ident = st.ident.clone();

    let parser = syn::punctuated::Punctuated::<Meta, Token![,]>::parse_terminated;
    let metas = parser.parse(attr)?;

    let mut id: Option<String> = None;
    let mut boot_images: Vec<Ident> = Vec::new();
    let mut ext_images: Vec<Ident> = Vec::new();
    let mut selinux_patching = false;

    for m in metas {
        let Meta::NameValue(nv) = m else {
            return Err(syn::Error::new(m.span(), "expected key = value"));
        };
        let Some(key) = nv.path.get_ident().map(|i| i.to_string()) else {
            return Err(syn::Error::new(nv.path.span(), "expected ident key"));
        };
        let v = &nv.value;
        match key.as_str() {
            "id" => id = Some(lit_str(v)?),
            "boot_images" => boot_images = expr_array_idents(v)?,
            "ext_images" => ext_images = expr_array_idents(v)?,
            "selinux_patching" => selinux_patching = lit_bool(v)?,
            other => {
                return Err(syn::Error::new(
                    nv.path.span(),
                    format!("unknown Module attribute key '{other}'"),
                ));
            }
        }
    }

    let id = id.ok_or_else(|| syn::Error::new(struct_ident.span(), "Module: missing id"))?;
    if id.trim().is_empty() || id.contains('.') {
        return Err(syn::Error::new(
            struct_ident.span(),
            "Module: id must be non-empty and contain no '.'",
        ));
    }

    let meta = ModuleMeta {
        id,
        boot_images,
        ext_images,
        selinux_patching,
    };

    let id_lit = meta.id;
    let boot = meta.boot_images;
    let ext = meta.ext_images;
    let selinux = meta.selinux_patching;

    let expanded = quote! {
        #st

        impl #struct_ident {
            pub const ID: &'static str = #id_lit;
            pub const BOOT_IMAGES: &'static [crate::requirements::Partition] =
                &[#(crate::requirements::Partition::#boot),*];
            pub const EXT_IMAGES: &'static [crate::requirements::Partition] =
                &[#(crate::requirements::Partition::#ext),*];
            pub const SELINUX_PATCHING: bool = #selinux;
        }

        impl crate::modules::Module for #struct_ident {
            fn id(&self) -> &'static str {
                #id_lit
            }

            fn requirements(&self) -> crate::requirements::ResourceRequirement {
                crate::requirements::ResourceRequirement::new(
                    Self::BOOT_IMAGES,
                    Self::EXT_IMAGES,
                    Self::SELINUX_PATCHING,
                )
            }

            fn inject(
                &self,
                res: &mut crate::resources::PreparedResources<'_>,
                ctx: &mut crate::executor::ExecCtx,
            ) -> crate::Result<()> {
                // Modules define their mutation by implementing:
                // `fn run(&self, res: &mut PreparedResources<'_>, ctx: &mut ExecCtx) -> Result<()>`
                Self::run(self, res, ctx)
            }
        }
    };

    Ok(expanded.into())
}
